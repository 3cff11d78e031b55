//! Constants shared by the library and the binary.

/// Environment variables read by hostlink and whitelisted for daemons.
pub mod envs {
    pub const HOSTLINK_HOME: &str = "HOSTLINK_HOME";
    pub const RUST_LOG: &str = "RUST_LOG";
    pub const PATH: &str = "PATH";
}

/// Default listening ports.
pub mod ports {
    pub const SFTPD: u16 = 2022;
    pub const PROXY: u16 = 3128;
}

/// File and directory names under the hostlink home and profile directories.
pub mod filenames {
    pub const DEFAULT_HOME: &str = ".hostlink";
    pub const CONFIG_JSON: &str = "config.json";
    pub const PROFILES_DIR: &str = "profiles";
    pub const CONFIG_DIR: &str = "config";
    pub const MACHINES_DIR: &str = "machines";
    pub const CERTS_DIR: &str = "certs";
    pub const LOGS_DIR: &str = "logs";
    pub const AUTHORIZED_KEYS: &str = "authorized_keys";
    pub const PRIVATE_KEY: &str = "id_rsa";
    pub const LOCK_SUFFIX: &str = ".lock";
}

/// Paths and identities inside the guest.
pub mod guest {
    pub const USER: &str = "docker";
    pub const KEY_FILE: &str = "/home/docker/.ssh/id_rsa";
    pub const DEFAULT_MOUNT_BASE: &str = "/mnt/sda1";
    pub const RHEL_CIFS_CONTEXT: &str = "context=system_u:object_r:svirt_sandbox_file_t:s0";
}

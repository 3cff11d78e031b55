//! Host folders shared into the guest over CIFS or SSHFS.
//!
//! Definitions live in two scopes: instance-scoped ones in the profile's
//! instance-state document, global ones in the shared state document. On
//! lookup the instance scope shadows the global one.

mod cifs;
pub mod crypto;
mod definition;
mod options;
mod sshfs;

#[cfg(test)]
mod testutil;

pub use cifs::{USERS_SHARE, unc_host};
pub use definition::{HostFolder, HostFolderKind, MountInfo, Scope, keys};
pub use options::parse_option_string;

use std::sync::Arc;

use hostlink_shared::errors::{HostlinkError, HostlinkResult};
use regex::Regex;

use crate::guest::{Driver, GuestBridge, GuestState};
use crate::layout::{Layout, ProfileLayout};
use crate::settings::Settings;
use crate::state::{InstanceState, JsonStore, SharedState};
use crate::supervisor::ServiceControl;
use crate::util::shell::quote;

/// Whether `/proc/mounts` text has an entry mounted at `mountpoint`.
pub fn mounts_contain(mounts: &str, mountpoint: &str) -> HostlinkResult<bool> {
    let pattern = Regex::new(&format!(r"{}\s+", regex::escape(mountpoint)))
        .map_err(|e| HostlinkError::Internal(format!("mountpoint pattern: {}", e)))?;
    Ok(pattern.is_match(mounts))
}

/// Ask the guest whether `mountpoint` is currently mounted.
pub fn is_mounted<B: GuestBridge + ?Sized>(bridge: &B, mountpoint: &str) -> HostlinkResult<bool> {
    let mounts = bridge.run("cat /proc/mounts")?;
    mounts_contain(&mounts, mountpoint)
}

/// Owns the host-folder definitions of one profile and mounts them into its guest.
///
/// Mutations go through the state documents' locks and are persisted before
/// returning.
pub struct Manager {
    profile: ProfileLayout,
    shared: JsonStore<SharedState>,
    instance: JsonStore<InstanceState>,
    settings: Settings,
    services: Arc<dyn ServiceControl>,
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("profile", &self.profile.name())
            .finish()
    }
}

impl Manager {
    pub fn new(
        layout: &Layout,
        profile: ProfileLayout,
        settings: Settings,
        services: Arc<dyn ServiceControl>,
    ) -> Self {
        Self {
            shared: JsonStore::new(layout.shared_state_path()),
            instance: JsonStore::new(profile.instance_state_path()),
            profile,
            settings,
            services,
        }
    }

    /// Store a new definition in `scope`.
    ///
    /// A plaintext `password` option is encrypted before it is written.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if `scope` already has a folder with this name.
    pub fn add(&self, mut folder: HostFolder, scope: Scope) -> HostlinkResult<()> {
        folder.validate()?;
        if let Some(password) = folder.option(keys::PASSWORD) {
            let sealed = crypto::encrypt(password)?;
            folder.options.insert(keys::PASSWORD.to_string(), sealed);
        }

        let name = folder.name.clone();
        let insert = |folders: &mut Vec<HostFolder>| {
            if folders.iter().any(|f| f.name == folder.name) {
                return Err(HostlinkError::AlreadyExists(format!(
                    "{} host folder {}",
                    scope, folder.name
                )));
            }
            folders.push(folder.clone());
            Ok(())
        };

        match scope {
            Scope::Instance => self
                .instance
                .update(|doc| insert(&mut doc.host_folders_instance))?,
            Scope::Global => self
                .shared
                .update(|doc| insert(&mut doc.host_folders_global))?,
        }

        tracing::info!(host_folder = %name, %scope, "host folder added");
        Ok(())
    }

    /// Remove `name`, from the instance scope if it is defined there, else from
    /// the global scope. Returns the scope it was removed from.
    pub fn remove(&self, name: &str) -> HostlinkResult<Scope> {
        let remove = |folders: &mut Vec<HostFolder>| {
            let before = folders.len();
            folders.retain(|f| f.name != name);
            Ok(folders.len() != before)
        };

        let in_instance = self
            .instance
            .load()?
            .host_folders_instance
            .iter()
            .any(|f| f.name == name);

        let scope = if in_instance {
            self.instance
                .update(|doc| remove(&mut doc.host_folders_instance))?;
            Scope::Instance
        } else if self.shared.update(|doc| remove(&mut doc.host_folders_global))? {
            Scope::Global
        } else {
            return Err(HostlinkError::NotFound(format!("host folder {}", name)));
        };

        tracing::info!(host_folder = %name, %scope, "host folder removed");
        Ok(scope)
    }

    /// Every definition, global scope first.
    fn definitions(&self) -> HostlinkResult<Vec<(Scope, HostFolder)>> {
        let global = self.shared.load()?.host_folders_global;
        let instance = self.instance.load()?.host_folders_instance;
        Ok(global
            .into_iter()
            .map(|f| (Scope::Global, f))
            .chain(instance.into_iter().map(|f| (Scope::Instance, f)))
            .collect())
    }

    fn lookup(&self, name: &str) -> HostlinkResult<HostFolder> {
        let instance = self.instance.load()?.host_folders_instance;
        if let Some(folder) = instance.into_iter().find(|f| f.name == name) {
            return Ok(folder);
        }
        self.shared
            .load()?
            .host_folders_global
            .into_iter()
            .find(|f| f.name == name)
            .ok_or_else(|| HostlinkError::NotFound(format!("host folder {}", name)))
    }

    /// One record per definition across both scopes.
    ///
    /// With a running guest, each record says whether it is mounted right now.
    pub fn list(&self, driver: Option<&dyn Driver>) -> HostlinkResult<Vec<MountInfo>> {
        let mounts = match driver {
            Some(driver) if driver.state()? == GuestState::Running => {
                Some(driver.run("cat /proc/mounts")?)
            }
            _ => None,
        };

        self.definitions()?
            .into_iter()
            .map(|(scope, folder)| {
                let mountpoint = folder.mountpoint(self.settings.mount_base());
                let mounted = match &mounts {
                    Some(mounts) => Some(mounts_contain(mounts, &mountpoint)?),
                    None => None,
                };
                Ok(MountInfo {
                    source: folder.source(),
                    name: folder.name,
                    kind: folder.kind,
                    scope,
                    mountpoint,
                    mounted,
                })
            })
            .collect()
    }

    fn require_running(driver: &dyn Driver) -> HostlinkResult<()> {
        match driver.state()? {
            GuestState::Running => Ok(()),
            GuestState::Stopped => Err(HostlinkError::InvalidState),
        }
    }

    /// Mount the definition called `name`.
    ///
    /// # Errors
    /// * `InvalidState` - The guest is not running
    /// * `AlreadyMounted` - The mountpoint is already in use
    /// * Anything the CIFS or SSHFS strategy reports
    pub fn mount(&self, driver: &dyn Driver, name: &str) -> HostlinkResult<()> {
        Self::require_running(driver)?;
        let folder = self.lookup(name)?;
        self.mount_folder(driver, &folder)
    }

    fn mount_folder(&self, driver: &dyn Driver, folder: &HostFolder) -> HostlinkResult<()> {
        let mountpoint = folder.mountpoint(self.settings.mount_base());

        driver
            .run(&format!("sudo mkdir -p {}", quote(&mountpoint)))
            .map_err(|e| HostlinkError::Mount(format!("{}: {}", folder.name, e)))?;

        if is_mounted(driver, &mountpoint)? {
            return Err(HostlinkError::AlreadyMounted(folder.name.clone()));
        }

        tracing::debug!(host_folder = %folder.name, kind = %folder.kind, %mountpoint, "mounting");
        match folder.kind {
            HostFolderKind::Cifs => {
                let rhel = self.instance.load()?.is_rhel_based;
                cifs::mount(driver, folder, &mountpoint, rhel)
            }
            HostFolderKind::Sshfs => {
                let ctx = sshfs::SshfsContext {
                    profile: &self.profile,
                    services: self.services.as_ref(),
                    sftp_port: self.settings.sftp_port(),
                };
                sshfs::mount(driver, folder, &mountpoint, &ctx)
            }
        }
    }

    /// Mount every definition, global scope first, continuing past failures.
    ///
    /// Folders that are already mounted are skipped. Returns the first
    /// failure, if any.
    pub fn mount_all(&self, driver: &dyn Driver) -> HostlinkResult<()> {
        Self::require_running(driver)?;

        let mut first_err = None;
        for (scope, folder) in self.definitions()? {
            match self.mount_folder(driver, &folder) {
                Ok(()) => {}
                Err(e) if e.is_already_mounted() => {
                    tracing::debug!(host_folder = %folder.name, %scope, "already mounted");
                }
                Err(e) => {
                    tracing::warn!(host_folder = %folder.name, %scope, error = %e, "mount failed");
                    first_err.get_or_insert(e);
                }
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// `mount_all` when `hostfolders-automount` is enabled, otherwise nothing.
    pub fn automount(&self, driver: &dyn Driver) -> HostlinkResult<()> {
        if !self.settings.automount() {
            return Ok(());
        }
        self.mount_all(driver)
    }

    /// Unmount `name`. Not being mounted is not an error.
    pub fn umount(&self, driver: &dyn Driver, name: &str) -> HostlinkResult<()> {
        Self::require_running(driver)?;
        let folder = self.lookup(name)?;
        let mountpoint = folder.mountpoint(self.settings.mount_base());

        if !is_mounted(driver, &mountpoint)? {
            tracing::debug!(host_folder = %name, %mountpoint, "not mounted");
            return Ok(());
        }

        driver
            .run(&format!("sudo umount {}", quote(&mountpoint)))
            .map_err(|e| HostlinkError::Mount(format!("{}: {}", name, e)))?;
        tracing::info!(host_folder = %name, %mountpoint, "unmounted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guest::mock::MockDriver;
    use crate::supervisor::DaemonKind;
    use testutil::{RecordingServices, script_guest_keys};
    use tempfile::TempDir;

    const MOUNTS: &str = "rootfs / rootfs rw 0 0\n/dev/sda1 /mnt/sda1 ext4 rw,relatime 0 0\n";
    const MOUNTS_WITH_USERS: &str = "rootfs / rootfs rw 0 0\n/dev/sda1 /mnt/sda1 ext4 rw,relatime 0 0\n\
        //192.168.99.1/Users /mnt/sda1/Users cifs rw,relatime 0 0\n";

    struct Fixture {
        _dir: TempDir,
        manager: Manager,
        services: Arc<RecordingServices>,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let layout = Layout::new(dir.path());
        let services = Arc::new(RecordingServices::default());
        let manager = Manager::new(
            &layout,
            layout.profile("dev"),
            Settings::default(),
            services.clone(),
        );
        Fixture {
            _dir: dir,
            manager,
            services,
        }
    }

    fn users() -> HostFolder {
        HostFolder::new("Users", HostFolderKind::Cifs)
            .with_option(keys::UNC_PATH, "//host/Users")
            .with_option(keys::USERNAME, "joe")
            .with_option(keys::PASSWORD, "pw")
    }

    fn sshfs(name: &str) -> HostFolder {
        HostFolder::new(name, HostFolderKind::Sshfs).with_option(keys::SOURCE, "/home/joe/src")
    }

    fn names(infos: &[MountInfo]) -> Vec<(String, Scope)> {
        infos.iter().map(|i| (i.name.clone(), i.scope)).collect()
    }

    #[test]
    fn test_mounts_contain() {
        assert!(!mounts_contain(MOUNTS, "/mnt/sda1/Users").unwrap());
        assert!(mounts_contain(MOUNTS_WITH_USERS, "/mnt/sda1/Users").unwrap());
        assert!(mounts_contain(MOUNTS, "/mnt/sda1").unwrap());
        assert!(!mounts_contain("x /a.b y", "/a+b").unwrap());
    }

    #[test]
    fn test_add_then_remove_restores_list() {
        let fx = fixture();
        fx.manager.add(sshfs("base"), Scope::Global).unwrap();
        let before = fx.manager.list(None).unwrap();

        fx.manager.add(sshfs("src"), Scope::Instance).unwrap();
        assert_eq!(fx.manager.list(None).unwrap().len(), 2);
        assert_eq!(fx.manager.remove("src").unwrap(), Scope::Instance);

        assert_eq!(fx.manager.list(None).unwrap(), before);
    }

    #[test]
    fn test_duplicate_rejected_within_scope_only() {
        let fx = fixture();
        fx.manager.add(sshfs("src"), Scope::Global).unwrap();
        assert!(matches!(
            fx.manager.add(sshfs("src"), Scope::Global),
            Err(HostlinkError::AlreadyExists(_))
        ));
        fx.manager.add(sshfs("src"), Scope::Instance).unwrap();

        assert_eq!(
            names(&fx.manager.list(None).unwrap()),
            vec![
                ("src".to_string(), Scope::Global),
                ("src".to_string(), Scope::Instance)
            ]
        );
    }

    #[test]
    fn test_remove_is_scope_limited() {
        let fx = fixture();
        fx.manager.add(sshfs("src"), Scope::Global).unwrap();
        fx.manager.add(sshfs("src"), Scope::Instance).unwrap();

        assert_eq!(fx.manager.remove("src").unwrap(), Scope::Instance);
        assert_eq!(
            names(&fx.manager.list(None).unwrap()),
            vec![("src".to_string(), Scope::Global)]
        );
        assert_eq!(fx.manager.remove("src").unwrap(), Scope::Global);
        assert!(matches!(
            fx.manager.remove("src"),
            Err(HostlinkError::NotFound(_))
        ));
    }

    #[test]
    fn test_password_encrypted_at_rest() {
        let fx = fixture();
        fx.manager.add(users(), Scope::Global).unwrap();

        let raw = std::fs::read_to_string(fx.manager.shared.path()).unwrap();
        assert!(!raw.contains("\"pw\""));
        let stored = fx.manager.lookup("Users").unwrap();
        assert_eq!(
            crypto::decrypt(stored.option(keys::PASSWORD).unwrap()).unwrap(),
            "pw"
        );
    }

    #[test]
    fn test_list_reports_live_mount_state() {
        let fx = fixture();
        fx.manager.add(users(), Scope::Global).unwrap();
        let driver = MockDriver::new();

        driver.on("cat /proc/mounts", MOUNTS);
        let infos = fx.manager.list(Some(&driver)).unwrap();
        assert_eq!(infos[0].mountpoint, "/mnt/sda1/Users");
        assert_eq!(infos[0].mounted, Some(false));

        driver.on("cat /proc/mounts", MOUNTS_WITH_USERS);
        assert_eq!(fx.manager.list(Some(&driver)).unwrap()[0].mounted, Some(true));

        driver.set_state(GuestState::Stopped);
        assert_eq!(fx.manager.list(Some(&driver)).unwrap()[0].mounted, None);
    }

    #[test]
    fn test_mount_requires_running_guest() {
        let fx = fixture();
        fx.manager.add(users(), Scope::Global).unwrap();
        let driver = MockDriver::new();
        driver.set_state(GuestState::Stopped);

        let err = fx.manager.mount(&driver, "Users").unwrap_err();
        assert_eq!(err.to_string(), "host is in the wrong state");
        assert!(driver.calls().is_empty());
    }

    #[test]
    fn test_mount_creates_mountpoint_first() {
        let fx = fixture();
        fx.manager.add(users(), Scope::Global).unwrap();
        let driver = MockDriver::new();
        driver.on("cat /proc/mounts", MOUNTS);

        fx.manager.mount(&driver, "Users").unwrap();

        let calls = driver.calls();
        assert_eq!(calls[0], "sudo mkdir -p /mnt/sda1/Users");
        let mkdir_at = calls.iter().position(|c| c.starts_with("sudo mkdir")).unwrap();
        let mount_at = calls.iter().position(|c| c.starts_with("sudo mount")).unwrap();
        assert!(mkdir_at < mount_at);
    }

    #[test]
    fn test_mount_already_mounted() {
        let fx = fixture();
        fx.manager.add(users(), Scope::Global).unwrap();
        let driver = MockDriver::new();
        driver.on("cat /proc/mounts", MOUNTS_WITH_USERS);

        let err = fx.manager.mount(&driver, "Users").unwrap_err();
        assert!(err.is_already_mounted());
        assert!(driver.calls_containing("sudo mount").is_empty());
    }

    #[test]
    fn test_mount_unknown_name() {
        let fx = fixture();
        let driver = MockDriver::new();
        assert!(matches!(
            fx.manager.mount(&driver, "nope"),
            Err(HostlinkError::NotFound(_))
        ));
    }

    #[test]
    fn test_instance_shadows_global_on_mount() {
        let fx = fixture();
        fx.manager
            .add(
                sshfs("src").with_option(keys::MOUNTPOINT, "/global"),
                Scope::Global,
            )
            .unwrap();
        fx.manager
            .add(
                sshfs("src").with_option(keys::MOUNTPOINT, "/instance"),
                Scope::Instance,
            )
            .unwrap();
        let driver = MockDriver::new();
        script_guest_keys(&driver);
        driver.on("netstat", "192.168.99.1");

        fx.manager.mount(&driver, "src").unwrap();
        assert_eq!(driver.calls()[0], "sudo mkdir -p /instance");
        assert_eq!(fx.services.started(), vec![DaemonKind::Sftpd]);
    }

    #[test]
    fn test_mountpoint_is_quoted_for_guest_shell() {
        let fx = fixture();
        fx.manager
            .add(
                sshfs("src").with_option(keys::MOUNTPOINT, "/srv/my src;id"),
                Scope::Global,
            )
            .unwrap();
        let driver = MockDriver::new();
        script_guest_keys(&driver);
        driver.on("netstat", "192.168.99.1");

        fx.manager.mount(&driver, "src").unwrap();
        assert_eq!(driver.calls()[0], "sudo mkdir -p '/srv/my src;id'");
    }

    #[test]
    fn test_mount_all_order_and_first_error() {
        let fx = fixture();
        fx.manager.add(sshfs("g1"), Scope::Global).unwrap();
        fx.manager
            .add(
                HostFolder::new("broken", HostFolderKind::Cifs)
                    .with_option(keys::UNC_PATH, "not-a-unc"),
                Scope::Global,
            )
            .unwrap();
        fx.manager.add(sshfs("i1"), Scope::Instance).unwrap();
        let driver = MockDriver::new();
        script_guest_keys(&driver);
        driver.on("netstat", "192.168.99.1");

        let err = fx.manager.mount_all(&driver).unwrap_err();
        assert!(matches!(err, HostlinkError::Unreachable(_)));

        let mkdirs = driver.calls_containing("sudo mkdir -p");
        assert_eq!(
            mkdirs,
            vec![
                "sudo mkdir -p /mnt/sda1/g1",
                "sudo mkdir -p /mnt/sda1/broken",
                "sudo mkdir -p /mnt/sda1/i1"
            ]
        );
        assert_eq!(driver.calls_containing("sudo sshfs").len(), 2);
    }

    #[test]
    fn test_mount_all_skips_already_mounted() {
        let fx = fixture();
        fx.manager.add(users(), Scope::Global).unwrap();
        let driver = MockDriver::new();
        driver.on("cat /proc/mounts", MOUNTS_WITH_USERS);

        fx.manager.mount_all(&driver).unwrap();
        assert!(driver.calls_containing("sudo mount").is_empty());
    }

    #[test]
    fn test_automount_disabled_by_default() {
        let fx = fixture();
        fx.manager.add(users(), Scope::Global).unwrap();
        let driver = MockDriver::new();

        fx.manager.automount(&driver).unwrap();
        assert!(driver.calls().is_empty());
    }

    #[test]
    fn test_umount() {
        let fx = fixture();
        fx.manager.add(users(), Scope::Global).unwrap();
        let driver = MockDriver::new();

        driver.on("cat /proc/mounts", MOUNTS);
        fx.manager.umount(&driver, "Users").unwrap();
        assert!(driver.calls_containing("umount").is_empty());

        driver.on("cat /proc/mounts", MOUNTS_WITH_USERS);
        fx.manager.umount(&driver, "Users").unwrap();
        assert_eq!(
            driver.calls_containing("umount"),
            vec!["sudo umount /mnt/sda1/Users"]
        );
    }
}

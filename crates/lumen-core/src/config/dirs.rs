use directories::ProjectDirs;
use std::path::PathBuf;

use crate::{Error, Result};

/// Application directories following the XDG layout
#[derive(Debug, Clone)]
pub struct Directories {
    /// Config directory (~/.config/lumen)
    pub config: PathBuf,

    /// Data directory (~/.local/share/lumen)
    pub data: PathBuf,

    /// User plugins (~/.config/lumen/plugins), shadow built-ins with the same id
    pub user_plugins: PathBuf,

    /// Plugins shipped with the launcher
    pub builtin_plugins: PathBuf,

    pub config_file: PathBuf,

    /// Persisted plugin indexes with their frecency counters
    pub index_cache: PathBuf,

    /// Persisted execution history
    pub history_file: PathBuf,
}

impl Directories {
    /// Resolve the standard per-user paths.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if no home directory can be determined.
    pub fn new() -> Result<Self> {
        let project = ProjectDirs::from("", "", "lumen")
            .ok_or_else(|| Error::Config("cannot determine home directory".to_string()))?;

        let config = project.config_dir().to_path_buf();
        let data = project.data_dir().to_path_buf();

        Ok(Self {
            user_plugins: config.join("plugins"),
            config_file: config.join("config.json"),
            index_cache: data.join("plugin-indexes.json"),
            history_file: data.join("history.json"),
            builtin_plugins: Self::find_builtin_plugins(),
            config,
            data,
        })
    }

    /// Everything under one directory. Used by tests and portable installs.
    #[must_use]
    pub fn with_base(base: PathBuf) -> Self {
        Self {
            user_plugins: base.join("plugins"),
            builtin_plugins: base.join("builtin-plugins"),
            config_file: base.join("config.json"),
            index_cache: base.join("plugin-indexes.json"),
            history_file: base.join("history.json"),
            config: base.clone(),
            data: base,
        }
    }

    fn find_builtin_plugins() -> PathBuf {
        if let Ok(exe_path) = std::env::current_exe()
            && let Some(exe_dir) = exe_path.parent()
        {
            let beside = exe_dir.join("plugins");
            if beside.exists() {
                return beside;
            }

            let share = exe_dir.join("../share/lumen/plugins");
            if share.exists() {
                return share.canonicalize().unwrap_or(share);
            }
        }

        PathBuf::from("/usr/share/lumen/plugins")
    }

    /// Create every directory the core writes to.
    ///
    /// # Errors
    ///
    /// Returns an error if any directory cannot be created.
    pub fn ensure_exists(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.config)?;
        std::fs::create_dir_all(&self.data)?;
        std::fs::create_dir_all(&self.user_plugins)?;
        Ok(())
    }
}

mod dirs;
mod settings;
mod validation;

pub use dirs::Directories;
pub use settings::{
    Config, DaemonSettings, HistorySettings, NavigationSettings, PersistenceSettings,
    SearchConfig,
};
pub use validation::warn_unknown_fields;

mod settings;

pub use settings::{
    AppSettings, AuthSettings, DatabaseSettings, EngineSettings, ModelSettings, Settings,
};

use crate::{
    config::Config,
    db::Database,
    devices::DeviceHub,
    engine::{
        clock::{Clock, SystemClock},
        Engine,
    },
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: Config,
    pub engine: Engine,
    pub devices: DeviceHub,
}

impl AppState {
    pub fn new(db: Database, config: Config) -> anyhow::Result<Self> {
        Self::with_clock(db, config, Arc::new(SystemClock))
    }

    /// Same as [`AppState::new`] with an explicit time source
    pub fn with_clock(db: Database, config: Config, clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        let devices = DeviceHub::new();
        let engine = Engine::from_config(
            &config,
            Arc::new(db.clone()),
            Arc::new(devices.clone()),
            clock,
        )?;

        Ok(Self {
            db,
            config,
            engine,
            devices,
        })
    }
}

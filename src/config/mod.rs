//! Workcell configuration
//!
//! Settings are an explicit value handed to the components that need them
//! (carousel layout, tool rack, actuation timeout, run log location). Nothing
//! reads configuration from process-global state, so independent workcells can
//! run side by side in one test binary.
//!
//! # Example
//!
//! ```no_run
//! use pin_transfer::config::Settings;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = Settings::load_from("config/pin_transfer.toml")?;
//!     println!("Stackers: {}", settings.carousel.stackers.len());
//!     Ok(())
//! }
//! ```

pub mod settings;

pub use settings::{
    ActuationConfig, ApplicationConfig, CarouselConfig, ConfigError, LiquidHandlerConfig,
    RunLogConfig, Settings, SimulatedDelays, StackerConfig, DEFAULT_CONFIG_PATH,
};

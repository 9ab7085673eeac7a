pub mod config;
pub mod fs;
pub mod msg;
pub mod shelley;
pub mod state;

pub use config::Config;
pub use fs::{FsCore, ShelleyFs};
pub use shelley::{HttpShelleyClient, ShelleyClient};
pub use state::StateStore;

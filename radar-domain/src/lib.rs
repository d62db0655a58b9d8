pub mod advertisement;
pub mod chrono_extra;
pub mod journal;
pub mod known_device;
pub mod location;
pub mod profile;
pub mod scan;
pub mod state;

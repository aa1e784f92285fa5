pub use config_model as config;

pub mod clock;
pub mod error;
pub mod events;
pub mod meta;
pub mod scan;
pub mod watch;

pub mod overlay {
    pub mod compositor;
    pub mod text;
}

pub mod platform {
    pub mod display_power;
    pub mod signals;
}

pub mod processing {
    pub mod color;
    pub mod layout;
    pub mod orientation;
    pub mod pipeline;
}

pub mod tasks {
    pub mod display_loop;
    pub mod power_cycle;
    pub mod viewer;
}

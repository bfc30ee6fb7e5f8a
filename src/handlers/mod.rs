pub mod tus_hooks;
pub mod uploads;
pub mod videos;

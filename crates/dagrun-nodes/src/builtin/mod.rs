pub mod automation;
pub mod delay;
pub mod http;
pub mod knowledge;
pub mod map;
pub mod messaging;
pub mod script;

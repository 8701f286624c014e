pub mod chat;
pub mod enums;
pub mod medication;
pub mod patch;
pub mod settings;
pub mod share;
pub mod test_result;
pub mod vaccination;

pub use chat::*;
pub use enums::*;
pub use medication::*;
pub use settings::*;
pub use share::*;
pub use test_result::*;
pub use vaccination::*;

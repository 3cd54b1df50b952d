mod codec;

pub use codec::{deserialize, detect, serialize, ParseError};

pub mod archive;
pub mod fetch;
pub mod layout;
pub mod output;
pub mod parser;
pub mod scores;

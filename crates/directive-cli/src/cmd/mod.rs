pub mod init;
pub mod load;
pub mod merge;
pub mod next;
pub mod run;
pub mod state;
pub mod validate;

pub mod apply;
pub mod lower;
pub mod run;
pub mod show;

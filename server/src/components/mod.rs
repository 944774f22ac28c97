pub mod layout;
pub mod pages;
pub mod ui;

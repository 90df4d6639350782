pub mod check;
pub mod state;

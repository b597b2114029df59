pub mod actuator;
pub mod run;

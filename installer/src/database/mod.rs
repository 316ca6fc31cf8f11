pub mod connection;
pub mod migrations;
pub mod provisioning;
pub mod seeding;
pub mod sql_script;

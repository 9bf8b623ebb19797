pub mod backup_exchange;
pub mod core;
pub mod grades;
pub mod lesson_content;
pub mod lessons;
pub mod pomodoro;
pub mod users;

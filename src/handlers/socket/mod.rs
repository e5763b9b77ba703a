pub mod schedule_status;

pub use schedule_status::get as schedule_status;

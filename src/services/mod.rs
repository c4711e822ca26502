pub mod application_service;
pub mod booklet_service;
pub mod grading_service;
pub mod offer_service;
pub mod question_service;
pub mod report_service;
pub mod roster_service;

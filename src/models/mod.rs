pub mod answer;
pub mod exam_session;

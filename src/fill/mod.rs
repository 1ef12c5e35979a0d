mod controller;
mod surface;
mod validation;


pub use controller::{
    AnswerMap, AnswerValue, FillController, FillError, FillOptions, FillPhase, FillResult,
    FillSnapshot, SubmitOutcome,
};
pub use surface::{FieldSurface, resolve_surface};
pub use validation::is_valid_email;

//! Discipline capability set.
//!
//! Every discipline shares one generation pipeline. What differs is fixed
//! here: the routing target its messages travel on, the athlete-data shape
//! stored on its plans, and the prompt used to generate its content.

pub mod athlete;
pub mod prompt;

pub use athlete::{AthleteData, AthleteDataError, AthleteProfile};
pub use periodize_db::models::Discipline;

use periodize_db::models::Plan;

/// Exchange every generation message is published through.
pub const EXCHANGE: &str = "plan-generation-exchange";

/// Where a discipline's generation messages are delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub queue_name: String,
    pub routing_key: String,
}

/// The static routing target for a discipline.
pub fn route(discipline: Discipline) -> Route {
    Route {
        queue_name: format!("plan-generation-{}-queue", discipline.as_str()),
        routing_key: format!("plan.{}.generate", discipline.as_str()),
    }
}

/// Project a stored plan into its discipline's typed athlete data.
pub fn athlete_data(plan: &Plan) -> Result<AthleteData, AthleteDataError> {
    AthleteData::from_value(plan.discipline, &plan.athlete)
}

//! Incidents and their resolution deadlines.

pub mod sla;
mod store;
mod types;

pub use store::IncidentStore;
pub use types::{
    CreateOutcome, Incident, IncidentFilter, IncidentPage, IncidentSource, IncidentStatus,
    IncidentType, NewIncident, PageRequest,
};

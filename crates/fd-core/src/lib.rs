//! # fd-core
//!
//! Domain models and services for Fleetdesk.
//!
//! This crate holds the asset, employee, ticketing, workplace and IPAM data
//! models together with the few pieces of real logic the service has:
//! subnet scanning, SLA breach classification, the audit trail and the
//! maintenance sweep. Persistence lives in [`db`] behind the `database`
//! feature.

#[macro_use]
mod macros;

pub mod audit;
pub mod auth;
pub mod envelope;
pub mod ipam;
pub mod models;
pub mod password;
pub mod sla;

#[cfg(feature = "database")]
pub mod db;

#[cfg(feature = "database")]
pub mod maintenance;

pub use audit::{
    compare_versions, field_changes, Actor, ActorType, AuditAction, AuditEntry, AuditFilter,
    ChangeSet, EntityType, FieldChange, RequestMeta,
};
pub use auth::{EmployeeSessionData, Permission, Role, SessionData, User, UserFilter};
pub use envelope::ActionResult;
pub use ipam::{
    scan_addresses, AddressEntry, AddressScan, AddressStatus, CidrError, DeviceRef, IpConflict,
    Ipv4Cidr, NetworkDevice, ScanError, ScanReport,
};
pub use models::*;
pub use password::{
    generate_password, hash_new_password, hash_password, validate_password_strength,
    verify_password, PasswordError,
};
pub use sla::{SlaPolicy, SlaState, SlaSummary, UrgencyTier};

#[cfg(feature = "database")]
pub use audit::AuditRecorder;
#[cfg(feature = "database")]
pub use ipam::SubnetScanner;
#[cfg(feature = "database")]
pub use maintenance::{MaintenanceReport, MaintenanceSweep};

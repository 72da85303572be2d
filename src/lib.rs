//! Registers the masters, agents and running tasks of a Mesos cluster as
//! Consul services and keeps those entries in step with the cluster.
//!
//! Each cycle a [`state::StateSource`] produces a snapshot, the
//! [`reconcile::Reconciler`] turns it into service definitions, and every
//! definition is checked against the [`registry::Registry`] cache before it
//! is written.

pub mod check;
pub mod config;
pub mod error;
pub mod naming;
pub mod privilege;
pub mod reconcile;
pub mod registry;
pub mod state;
pub mod tags;

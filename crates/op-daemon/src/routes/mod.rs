// SPDX-License-Identifier: MIT OR Apache-2.0
//! Route handlers, one module per resource group from spec.md §6's HTTP
//! surface table.

/// Collaborator (character) CRUD and image upload.
pub mod characters;
/// Liveness, readiness, capability advertisement.
pub mod health;
/// Job submission, inspection, cancellation, SSE streaming, observability.
pub mod jobs;
/// LoRA listing and client-side log ingestion.
pub mod loras;
/// Interaction register CRUD and debug-bundle export.
pub mod uelr;

//! Tax office client portal.
//!
//! JSON record store and blob store on local disk, in-memory bearer sessions,
//! the client/template/document workflow in [`portal`], and an Axum REST layer
//! in [`rest`].

pub mod auth;
pub mod blobs;
pub mod config;
pub mod error;
pub mod mail;
pub mod models;
pub mod portal;
// REST API module: Axum HTTP handlers for the admin dashboard and client portal
pub mod rest;
pub mod storage;

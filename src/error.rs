// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur when talking to the library server
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Request to {url} failed: {source}")]
    RequestFailed {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP error {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Failed to decode response from {url}: {source}")]
    DecodeFailed {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Request timed out after {0:?}")]
    TimedOut(std::time::Duration),

    #[error("Invalid server URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl ApiError {
    /// Whether the server reported that the addressed resource does not exist
    ///
    /// For session sync this means the server already closed the session.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::HttpStatus { status: 404, .. })
    }
}

/// Errors that can occur when reading or writing the local store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to create directory {path}: {source}")]
    CreateDirectoryFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read directory {path}: {source}")]
    ReadDirectoryFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read record {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write record {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove record {path}: {source}")]
    RemoveFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse record JSON in {path}: {source}")]
    JsonParseFailed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize record: {0}")]
    JsonSerializeFailed(#[from] serde_json::Error),

    #[error("Record id {id:?} cannot be used as a file name")]
    InvalidRecordId { id: String },
}

/// Errors that can occur when replaying cached sessions to the server
#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("Failed to read cached sessions: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to upload cached sessions: {0}")]
    Api(#[from] ApiError),
}

/// Errors that can occur when interpreting device settings
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Invalid time of day '{value}', expected HH:MM")]
    InvalidTimeOfDay { value: String },
}

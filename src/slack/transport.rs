//! Chat transport abstraction.
//!
//! The [`ChatTransport`] trait decouples the renderer and executor from the
//! Slack Web API. [`SlackService`](crate::slack::client::SlackService) is the
//! production implementation; tests substitute an in-memory recorder.

use std::future::Future;
use std::pin::Pin;

use crate::models::task::{Destination, MessageBody, MessageRef};
use crate::Result;

/// Boxed future returned by [`ChatTransport`] methods.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Outbound operations the relay performs against the chat surface.
///
/// Text passed in [`MessageBody`] is markdown; implementations convert it
/// to the surface's own markup.
pub trait ChatTransport: Send + Sync {
    /// Post a new message and return its reference.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Slack`](crate::AppError::Slack) if the API call fails.
    fn post<'a>(
        &'a self,
        destination: &'a Destination,
        body: &'a MessageBody,
    ) -> TransportFuture<'a, MessageRef>;

    /// Replace the content of a posted message.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Slack`](crate::AppError::Slack) if the API call fails.
    fn update<'a>(&'a self, message: &'a MessageRef, body: &'a MessageBody)
        -> TransportFuture<'a, ()>;

    /// Delete a posted message.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Slack`](crate::AppError::Slack) if the API call fails.
    fn delete<'a>(&'a self, message: &'a MessageRef) -> TransportFuture<'a, ()>;

    /// Add an emoji reaction to a message.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Slack`](crate::AppError::Slack) if the API call fails.
    fn add_reaction<'a>(&'a self, message: &'a MessageRef, name: &'a str)
        -> TransportFuture<'a, ()>;

    /// Remove an emoji reaction from a message.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Slack`](crate::AppError::Slack) if the API call fails.
    fn remove_reaction<'a>(
        &'a self,
        message: &'a MessageRef,
        name: &'a str,
    ) -> TransportFuture<'a, ()>;

    /// Upload `content` as a file attachment and return its permalink.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Slack`](crate::AppError::Slack) if any step of
    /// the upload fails.
    fn upload<'a>(
        &'a self,
        destination: &'a Destination,
        filename: &'a str,
        content: &'a str,
    ) -> TransportFuture<'a, String>;

    /// Create a channel and return its ID.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Slack`](crate::AppError::Slack) if the API call fails.
    fn create_channel<'a>(&'a self, name: &'a str) -> TransportFuture<'a, String>;

    /// Archive a channel.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Slack`](crate::AppError::Slack) if the API call fails.
    fn archive_channel<'a>(&'a self, channel: &'a str) -> TransportFuture<'a, ()>;
}

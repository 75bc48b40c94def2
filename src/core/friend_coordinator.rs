//! Friend request workflow
//!
//! The unordered email pair of a request is unique in storage. Duplicate
//! detection relies entirely on that constraint: the insert is attempted
//! and a `Duplicate` result is reported as such, with no read beforehand.

use log::{debug, error, info, warn};
use std::fmt;
use std::sync::Arc;

use crate::auth::{looks_like_email, normalize_email, Identity};
use crate::constants::FRIEND_REQUEST_SUBJECT;
use crate::core::events::{AckStatus, FriendRequestNotice, Notification, ServerEvent};
use crate::core::gateway::Gateway;
use crate::mail::{MailSender, MailTemplate};
use crate::storage::{FriendRequest, InsertError, NewFriendRequest, StorageProvider, StoredUser};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FriendRequestOutcome {
    /// A request between the two parties already exists
    Duplicate,
    /// Invalid recipient, storage failure or mail failure
    Error,
    /// Recipient has no account; an invitation mail went out
    EmailSent,
    /// Recipient has an account and was notified on their channel
    FriendSent,
}

impl FriendRequestOutcome {
    pub fn status(&self) -> AckStatus {
        match self {
            FriendRequestOutcome::Duplicate => AckStatus::Duplicate,
            FriendRequestOutcome::Error => AckStatus::Error,
            FriendRequestOutcome::EmailSent => AckStatus::EmailSent,
            FriendRequestOutcome::FriendSent => AckStatus::FriendSent,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FriendRequestOutcome::Duplicate => "duplicate",
            FriendRequestOutcome::Error => "error",
            FriendRequestOutcome::EmailSent => "email_sent",
            FriendRequestOutcome::FriendSent => "friend_sent",
        }
    }
}

impl fmt::Display for FriendRequestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What one committed insert produced
struct RecordedRequest {
    request: FriendRequest,
    recipient: Option<StoredUser>,
    sender: Option<StoredUser>,
}

pub struct FriendRequestCoordinator {
    storage: Arc<dyn StorageProvider>,
    gateway: Arc<dyn Gateway>,
    mailer: Arc<dyn MailSender>,
}

impl FriendRequestCoordinator {
    pub fn new(
        storage: Arc<dyn StorageProvider>,
        gateway: Arc<dyn Gateway>,
        mailer: Arc<dyn MailSender>,
    ) -> Self {
        Self {
            storage,
            gateway,
            mailer,
        }
    }

    pub async fn send_friend_request(
        &self,
        sender: &Identity,
        receiver_email: &str,
    ) -> FriendRequestOutcome {
        let receiver = normalize_email(receiver_email);
        if !looks_like_email(&receiver) {
            warn!("Friend request from {} to invalid address '{}'", sender.email, receiver);
            return FriendRequestOutcome::Error;
        }
        if receiver == sender.email {
            warn!("Ignoring friend request from {} to themselves", sender.email);
            return FriendRequestOutcome::Error;
        }

        let recorded = match self.record(sender, &receiver).await {
            Ok(recorded) => recorded,
            Err(InsertError::Duplicate) => {
                info!("Friend request between {} and {} already exists", sender.email, receiver);
                return FriendRequestOutcome::Duplicate;
            }
            Err(InsertError::Storage(e)) => {
                error!("Failed to store friend request from {}: {}", sender.email, e);
                return FriendRequestOutcome::Error;
            }
        };

        match recorded.recipient {
            None => self.invite_by_mail(&recorded.request).await,
            Some(_) => {
                let notice = FriendRequestNotice::new(&recorded.request, recorded.sender.as_ref());
                let reached = self.gateway.emit_to_identity(
                    &recorded.request.receiver_email,
                    &ServerEvent::Notification(Notification::FriendRequest(notice)),
                );
                debug!(
                    "Friend request {} reached {} connections of {}",
                    recorded.request.id, reached, recorded.request.receiver_email
                );
                FriendRequestOutcome::FriendSent
            }
        }
    }

    /// Insert the request and read both profiles in one transaction
    async fn record(
        &self,
        sender: &Identity,
        receiver: &str,
    ) -> std::result::Result<RecordedRequest, InsertError> {
        let mut tx = self.storage.begin().await?;

        let recipient = tx.find_user_by_email(receiver).await?;
        let request = tx
            .insert_friend_request(NewFriendRequest {
                sender_id: sender.user_id.clone(),
                sender_email: sender.email.clone(),
                receiver_email: receiver.to_string(),
            })
            .await?;
        let sender_profile = match recipient {
            Some(_) => tx.find_user_by_email(&sender.email).await?,
            None => None,
        };

        tx.commit().await?;
        Ok(RecordedRequest {
            request,
            recipient,
            sender: sender_profile,
        })
    }

    async fn invite_by_mail(&self, request: &FriendRequest) -> FriendRequestOutcome {
        let template = MailTemplate::FriendRequest {
            sender_email: request.sender_email.clone(),
        };

        match self
            .mailer
            .send(&request.receiver_email, FRIEND_REQUEST_SUBJECT, template)
            .await
        {
            Ok(receipt) => {
                info!(
                    "Friend request {} mailed to {} (receipt {})",
                    request.id, request.receiver_email, receipt.id
                );
                FriendRequestOutcome::EmailSent
            }
            Err(e) => {
                error!(
                    "Friend request {} stored but mail to {} failed: {}",
                    request.id, request.receiver_email, e
                );
                FriendRequestOutcome::Error
            }
        }
    }
}

//! Facades: the surface the rest of the application calls.
//!
//! They are thin and delegate to repositories, except where an operation
//! spans several rows and needs a transaction of its own.

mod conversation;
mod iam;

pub use conversation::{ConversationFacade, TEAM_ACCESS_ROLE, USER_ACCESS_ROLE};
pub use iam::{
    IamFacade, IdentityProfile, SyncOutcome, TeamAccessFacade, TeamFacade, UserFacade,
    VerifiedIdentity,
};

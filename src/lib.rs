//! peercall-core: 1:1 peer call signalling engine
//!
//! A state machine that drives a single peer-to-peer media session through
//! its lifecycle (offer/answer exchange, ICE candidate trickling,
//! renegotiation, hangup) over an abstract messaging transport, while
//! delegating the actual media transport to an external peer connection
//! provider. It features:
//!
//! - **Race-aware state machine**: nine lifecycle states with an absorbing
//!   `Ended`; every resumption point re-checks state
//! - **Serialized renegotiation**: at-most-one in-flight negotiation,
//!   strictly FIFO
//! - **Trickle ICE batching**: outbound candidates batched with a
//!   direction-dependent delay, inbound candidates buffered until an
//!   opponent device commits
//! - **Stream metadata reconciliation**: remote track purpose and mute
//!   state driven by in-band metadata
//!
//! # Examples
//!
//! ```rust,no_run
//! use peercall_core::{CallConfig, CallHandler, PeerCall, TokioTimeoutCreator};
//! use std::sync::Arc;
//!
//! # async fn example(
//! #     handler: Arc<dyn CallHandler>,
//! #     peer_connection: Arc<dyn peercall_core::PeerConnection>,
//! #     media: std::future::Ready<Result<Arc<dyn peercall_core::LocalMedia>, peercall_core::MediaError>>,
//! # ) -> Result<(), peercall_core::CallError> {
//! let call = PeerCall::new(
//!     handler,
//!     peer_connection,
//!     Arc::new(TokioTimeoutCreator),
//!     CallConfig::default(),
//! );
//!
//! // place a call; resolves once the invite is out
//! call.call(media).await?;
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::panic)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

/// Core value types, states and configuration
pub mod types;

/// Error taxonomy: hangup reasons and API errors
pub mod error;

/// Signalling message codec
pub mod messages;

/// Cancellable delay abstraction
pub mod timer;

/// Local media abstractions
pub mod media;

/// Abstract peer connection interface
pub mod peer_connection;

/// Stream metadata registry
pub mod metadata;

/// ICE candidate queues
pub mod candidates;

/// Renegotiation serialization
pub mod negotiation;

/// Track reconciliation
pub mod reconcile;

/// The peer call state machine
pub mod call;

// Re-export main types at crate root
pub use call::{CallHandler, CallUpdate, PeerCall};
pub use error::{CallError, CallErrorCode, SignallingError};
pub use media::{LocalMedia, MediaError, MediaTrack};
pub use messages::SignallingMessage;
pub use metadata::StreamMetadataRegistry;
pub use peer_connection::{
    DataChannel, PeerConnection, PeerConnectionError, PeerConnectionObserver,
};
pub use timer::{Disposables, Timeout, TimeoutCreator, TokioTimeoutCreator};
pub use types::{
    CallConfig, CallDirection, CallId, CallParty, CallState, IceCandidate, IceConnectionState,
    IceGatheringState, PartyId, SdpStreamMetadata, SdpType, SessionDescription, StreamMetadata,
    StreamPurpose, TrackKind, CALL_TIMEOUT_MS, FALLBACK_ICE_SERVER, SIGNALLING_VERSION,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::call::{CallHandler, CallUpdate, PeerCall};
    pub use crate::error::{CallError, CallErrorCode, SignallingError};
    pub use crate::media::{LocalMedia, MediaError, MediaTrack};
    pub use crate::messages::SignallingMessage;
    pub use crate::peer_connection::{PeerConnection, PeerConnectionObserver};
    pub use crate::timer::{TimeoutCreator, TokioTimeoutCreator};
    pub use crate::types::{
        CallConfig, CallDirection, CallId, CallParty, CallState, IceCandidate, PartyId,
        SessionDescription, StreamPurpose, TrackKind,
    };
}

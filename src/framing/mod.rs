//! Message framing — the three wire protocols spoken over the link.
//!
//! | Direction | Protocol                 | Header | Module       |
//! |-----------|--------------------------|--------|--------------|
//! | outbound  | chunked write            | 4 B    | [`chunked`]  |
//! | inbound   | unified, paged/streamed  | 8 B    | [`unified`]  |
//! | inbound   | legacy environmental     | 3 B    | [`legacy`]   |
//!
//! Each protocol is an explicit variant; no attempt is made to sniff one
//! from another.  The characteristic a frame arrived on decides which
//! decoder sees it (see [`crate::gatt`]).

pub mod chunked;
pub mod legacy;
pub mod unified;

/// Which decoder handles inbound bytes on an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// One notification is one structure.
    Raw,
    /// Unified header; every frame is a standalone page.
    UnifiedPaged,
    /// Unified header; frames concatenate into one message.
    UnifiedStream,
    /// Legacy 3-byte header into a statically sized buffer.
    Legacy,
}

//! Software-side request model.
//!
//! The ring never owns requests. It stores an opaque [`RequestRef`] in
//! each descriptor and hands it back on completion; the request pool
//! collaborator maps it back to the real object.

/// Opaque back-reference to the originating software request.
///
/// Pointer-sized; round-tripped through the descriptor verbatim and
/// never dereferenced by the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct RequestRef(pub u64);

/// Request status bits.
pub mod status {
    /// Data-path error: malformed input, length mismatch or a
    /// hardware-reported descriptor error.
    pub const DATA_ERROR: u32 = 1 << 0;
    /// CRC check failed.
    pub const CRC_ERROR: u32 = 1 << 1;
    /// Decoder did not converge (syndrome check failed).
    pub const SYNDROME_ERROR: u32 = 1 << 2;
    /// Request left the ring without being processed.
    pub const NOT_PROCESSED: u32 = 1 << 3;
    /// Request was rejected before a descriptor was written.
    pub const MALFORMED: u32 = 1 << 4;

    pub const SUCCESS: u32 = 0;
}

/// Result of validating a request before its descriptors are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestCheck {
    Valid,
    /// Unusable request (e.g. null data buffer). Never written.
    Malformed,
    /// Buffer length disagrees with the expected block size.
    /// Handling depends on the ring's mismatch policy.
    SizeMismatch,
}

/// A request that can be submitted to a descriptor ring.
pub trait RingRequest {
    /// Back-reference stored in every descriptor of this request.
    fn request_ref(&self) -> RequestRef;

    /// Descriptors this request occupies (1:many for chained commands).
    fn descriptor_count(&self) -> usize {
        1
    }

    /// Validate before any descriptor is written.
    fn check(&self) -> RequestCheck {
        RequestCheck::Valid
    }

    /// OR `status` bits into the request's own status field.
    fn mark(&mut self, status: u32);
}

/// A drained request as seen by the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub request: RequestRef,
    /// `status::*` bits; `SUCCESS` when zero.
    pub status: u32,
    /// Decoder iterations, zero where not applicable.
    pub iter_count: u8,
}

impl Completion {
    #[inline]
    pub fn success(request: RequestRef) -> Self {
        Self {
            request,
            status: status::SUCCESS,
            iter_count: 0,
        }
    }

    #[inline]
    pub fn is_ok(&self) -> bool {
        self.status == status::SUCCESS
    }
}

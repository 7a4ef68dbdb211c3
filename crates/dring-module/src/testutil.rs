//! Request and payload types shared by the unit tests.

use std::sync::Arc;

use dring_core::request::{Completion, RequestCheck, RequestRef, RingRequest};
use dring_core::slot::Payload;

use crate::mmio::HeapRegisters;
use crate::ring::DescriptorRing;

#[derive(Debug, Clone, Copy, Default)]
pub struct TestPayload {
    pub id: u64,
    pub part: u32,
}

#[derive(Debug)]
pub struct TestReq {
    pub id: u64,
    pub parts: usize,
    pub check: RequestCheck,
    pub status: u32,
}

impl TestReq {
    pub fn new(id: u64) -> Self {
        Self { id, parts: 1, check: RequestCheck::Valid, status: 0 }
    }

    pub fn chained(id: u64, parts: usize) -> Self {
        Self { parts, ..Self::new(id) }
    }

    pub fn checked(id: u64, check: RequestCheck) -> Self {
        Self { check, ..Self::new(id) }
    }
}

impl RingRequest for TestReq {
    fn request_ref(&self) -> RequestRef {
        RequestRef(self.id)
    }
    fn descriptor_count(&self) -> usize {
        self.parts
    }
    fn check(&self) -> RequestCheck {
        self.check
    }
    fn mark(&mut self, status: u32) {
        self.status |= status;
    }
}

impl Payload for TestPayload {
    type Request = TestReq;
    fn build(request: &TestReq, part: usize) -> Self {
        TestPayload { id: request.id, part: part as u32 }
    }
}

pub type TestRing = DescriptorRing<TestPayload, Arc<HeapRegisters>>;

pub fn reqs(ids: std::ops::Range<u64>) -> Vec<TestReq> {
    ids.map(TestReq::new).collect()
}

pub fn ids(completions: &[Completion]) -> Vec<u64> {
    completions.iter().map(|c| c.request.0).collect()
}

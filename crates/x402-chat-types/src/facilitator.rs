//! The interface to whatever verifies and settles x402 payments.
//!
//! A remote facilitator reached over HTTP is the production implementation; tests plug in
//! in-process stubs.

use std::fmt::{Debug, Display};
use std::sync::Arc;

use crate::proto::v1;

/// Asynchronous verify/settle capability of an x402 facilitator.
pub trait Facilitator {
    /// The error type returned by this facilitator.
    type Error: Debug + Display;

    /// Checks a payment payload against its requirements without moving funds.
    fn verify(
        &self,
        request: &v1::VerifyRequest,
    ) -> impl Future<Output = Result<v1::VerifyResponse, Self::Error>> + Send;

    /// Re-validates the payment and executes the on-chain transfer.
    fn settle(
        &self,
        request: &v1::SettleRequest,
    ) -> impl Future<Output = Result<v1::SettleResponse, Self::Error>> + Send;
}

impl<T: Facilitator> Facilitator for Arc<T> {
    type Error = T::Error;

    fn verify(
        &self,
        request: &v1::VerifyRequest,
    ) -> impl Future<Output = Result<v1::VerifyResponse, Self::Error>> + Send {
        self.as_ref().verify(request)
    }

    fn settle(
        &self,
        request: &v1::SettleRequest,
    ) -> impl Future<Output = Result<v1::SettleResponse, Self::Error>> + Send {
        self.as_ref().settle(request)
    }
}

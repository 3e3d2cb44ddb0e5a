//! The transport contract consumed by the driver core

use crate::error::Rejected;
use crate::request::TransferRequest;
use crate::types::{DeviceId, InterfaceDescriptor, RequestId};

/// An asynchronous bulk-transfer transport bound to one interface
///
/// # Contract
///
/// - [`submit`](Transport::submit) must not block and must not invoke the
///   request's completion handler before returning `Err`. On `Ok`, the
///   request completes exactly once, from any thread, possibly before
///   `submit` returns.
/// - [`cancel`](Transport::cancel) asks for an outstanding request to finish
///   early. The request then completes with a cancellation-class status
///   (or its real status if it was already finishing). Cancelling an
///   unknown or finished request is a no-op.
pub trait Transport: Send + Sync + 'static {
    /// Vendor/product of the underlying device
    fn device_id(&self) -> DeviceId;

    /// Active setting of the bound interface
    fn interface(&self) -> InterfaceDescriptor;

    /// Queue a request on the endpoint it names
    fn submit(&self, request: TransferRequest) -> Result<(), Rejected>;

    /// Ask for an outstanding request to be unlinked
    fn cancel(&self, id: RequestId);
}

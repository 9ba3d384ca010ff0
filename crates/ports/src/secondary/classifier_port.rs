use domain::common::error::DomainError;
use domain::iface::entity::Interface;

/// Secondary port for attaching the flow classifier to an interface.
///
/// Implemented by the eBPF loader adapter: `register` installs a clsact
/// qdisc if absent and attaches the classifier at the enabled hook
/// points; `unregister` detaches explicitly (the kernel also drops
/// filters implicitly when the interface disappears, which the
/// implementation treats as success).
pub trait ClassifierPort: Send + Sync {
    fn register(&self, iface: &Interface) -> Result<(), DomainError>;

    fn unregister(&self, iface: &Interface) -> Result<(), DomainError>;
}

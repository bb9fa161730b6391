use crate::value::Instance;

/// Maps shared instances to the channel ids that carry them.
///
/// The encoder writes a shared instance as its channel id; the decoder turns
/// an id back into the instance. The connection that owns the channels
/// implements this.
pub trait ResolveProxyIds: Send + Sync {
    /// The channel id of a shared instance, if it is shared here.
    fn instance_id(&self, instance: &Instance) -> Option<i64>;

    /// The instance shared on channel `id`, if any.
    fn instance(&self, id: i64) -> Option<Instance>;
}

/// A resolver with nothing shared.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProxies;

impl ResolveProxyIds for NoProxies {
    fn instance_id(&self, _instance: &Instance) -> Option<i64> {
        None
    }

    fn instance(&self, _id: i64) -> Option<Instance> {
        None
    }
}

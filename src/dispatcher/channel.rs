//! Channels link notifier hooks to listener hooks inside one stage.
//!
//! Listeners never run as part of a wave. Each completed notifier hands its
//! output to the listeners of every channel it feeds, one delivery at a time
//! per channel.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::core::{ContextValue, StageContext};
use crate::error::HookError;
use crate::hooks::{Hook, HookArgs, HookCall};

struct Channel {
    name: String,
    listeners: Vec<Hook>,
    gate: Mutex<()>,
    deliveries: AtomicU64,
}

#[derive(Default)]
struct ChannelTable {
    channels: Vec<Channel>,
    by_notifier: HashMap<String, Vec<usize>>,
}

#[derive(Clone, Default)]
pub struct ChannelBus {
    inner: Arc<ChannelTable>,
}

impl std::fmt::Debug for ChannelBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelBus")
            .field(
                "channels",
                &self.inner.channels.iter().map(|c| &c.name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl ChannelBus {
    /// Builds the bus from a stage's hooks. Members that do not resolve to a
    /// hook of the stage are ignored; validation reports them beforehand.
    pub fn from_hooks(hooks: &[Hook]) -> Self {
        let by_name: HashMap<&str, &Hook> = hooks.iter().map(|h| (h.name.as_str(), h)).collect();
        let mut table = ChannelTable::default();

        for hook in hooks {
            let Some((notify, listen)) = hook.channel_members() else {
                continue;
            };
            let listeners: Vec<Hook> = listen
                .iter()
                .filter_map(|name| by_name.get(name.as_str()).map(|h| (*h).clone()))
                .collect();
            let index = table.channels.len();
            table.channels.push(Channel {
                name: hook.name.clone(),
                listeners,
                gate: Mutex::new(()),
                deliveries: AtomicU64::new(0),
            });
            for notifier in notify {
                table
                    .by_notifier
                    .entry(notifier.clone())
                    .or_default()
                    .push(index);
            }
        }

        Self {
            inner: Arc::new(table),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.channels.is_empty()
    }

    pub fn is_notifier(&self, hook: &str) -> bool {
        self.inner.by_notifier.contains_key(hook)
    }

    /// Names of every hook that only runs when notified.
    pub fn listener_names(&self) -> HashSet<String> {
        self.inner
            .channels
            .iter()
            .flat_map(|c| c.listeners.iter().map(|h| h.name.clone()))
            .collect()
    }

    /// Number of values delivered through each channel so far.
    pub fn deliveries(&self) -> BTreeMap<String, u64> {
        self.inner
            .channels
            .iter()
            .map(|c| (c.name.clone(), c.deliveries.load(Ordering::Relaxed)))
            .collect()
    }

    /// Delivers `value` from `notifier` to the listeners of each channel it
    /// feeds. Listener outputs land in their `store_key`, if any.
    pub async fn notify(
        &self,
        notifier: &str,
        value: &ContextValue,
        context: &StageContext,
    ) -> Result<(), HookError> {
        let Some(indices) = self.inner.by_notifier.get(notifier) else {
            return Ok(());
        };
        for index in indices {
            let channel = &self.inner.channels[*index];
            let _guard = channel.gate.lock().await;
            for listener in &channel.listeners {
                let HookCall::Value(call) = &listener.call else {
                    continue;
                };
                let output = call(HookArgs {
                    hook: listener.qualified_name(),
                    context: context.clone(),
                    input: value.clone(),
                })
                .await?;
                if let Some(key) = &listener.store_key {
                    context.set(key.clone(), output);
                }
            }
            channel.deliveries.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }
}

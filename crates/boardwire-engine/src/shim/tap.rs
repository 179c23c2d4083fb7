//! Observability tap: records values passing a wire, never alters or holds
//! them.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use boardwire_kernel::{TapConfig, TapSinkKind};
use boardwire_lattice::LatticeValue;

use super::{Admission, Shim, ShimContext, ShimItem};
use crate::error::ShimError;
use crate::sink::ShimEvent;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TapRecord {
    pub value: LatticeValue,
    pub pulse: u64,
    pub at: DateTime<Utc>,
}

/// Filter consulted before recording. An `Err` counts as "record".
pub type TapPredicate = Arc<dyn Fn(&LatticeValue) -> Result<bool, String> + Send + Sync>;

pub type TapCallback = Arc<dyn Fn(&TapRecord) + Send + Sync>;

/// Named predicates and callbacks that tap configs refer to.
#[derive(Clone, Default)]
pub struct TapHooks {
    predicates: BTreeMap<String, TapPredicate>,
    callbacks: BTreeMap<String, TapCallback>,
}

impl TapHooks {
    pub fn predicate(mut self, name: impl Into<String>, predicate: TapPredicate) -> Self {
        self.predicates.insert(name.into(), predicate);
        self
    }

    pub fn callback(mut self, name: impl Into<String>, callback: TapCallback) -> Self {
        self.callbacks.insert(name.into(), callback);
        self
    }
}

impl std::fmt::Debug for TapHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TapHooks")
            .field("predicates", &self.predicates.keys().collect::<Vec<_>>())
            .field("callbacks", &self.callbacks.keys().collect::<Vec<_>>())
            .finish()
    }
}

pub struct Tap {
    config: TapConfig,
    predicate: Option<TapPredicate>,
    callback: Option<TapCallback>,
    buffer: VecDeque<TapRecord>,
    buffer_size: usize,
    last_tap: Option<DateTime<Utc>>,
    count: u64,
}

impl Tap {
    pub fn new(
        config: TapConfig,
        default_buffer_size: usize,
        hooks: &TapHooks,
    ) -> Result<Self, ShimError> {
        let predicate = match &config.predicate {
            Some(name) => Some(hooks.predicates.get(name).cloned().ok_or_else(|| {
                ShimError::Config(format!("tap predicate {name} is not registered"))
            })?),
            None => None,
        };
        let callback = match (&config.sink, &config.callback) {
            (TapSinkKind::Callback, Some(name)) => {
                Some(hooks.callbacks.get(name).cloned().ok_or_else(|| {
                    ShimError::Config(format!("tap callback {name} is not registered"))
                })?)
            }
            (TapSinkKind::Callback, None) => {
                return Err(ShimError::Config(
                    "callback tap needs a callback name".to_string(),
                ));
            }
            _ => None,
        };
        let buffer_size = config.buffer_size.unwrap_or(default_buffer_size).max(1);
        Ok(Self {
            config,
            predicate,
            callback,
            buffer: VecDeque::new(),
            buffer_size,
            last_tap: None,
            count: 0,
        })
    }

    fn should_record(&self, value: &LatticeValue, now: DateTime<Utc>) -> bool {
        if let Some(max) = self.config.max_taps
            && self.count >= max
        {
            return false;
        }
        if let (Some(min_ms), Some(last)) = (self.config.min_interval_ms, self.last_tap)
            && (now - last).num_milliseconds() < i64::try_from(min_ms).unwrap_or(i64::MAX)
        {
            return false;
        }
        match &self.predicate {
            Some(predicate) => predicate(value).unwrap_or(true),
            None => true,
        }
    }
}

impl Shim for Tap {
    fn kind(&self) -> &str {
        "tap"
    }

    fn admit(&mut self, item: ShimItem, cx: &ShimContext<'_>) -> Admission {
        if self.should_record(&item.value, cx.now) {
            self.count += 1;
            self.last_tap = Some(cx.now);
            let record = TapRecord {
                value: item.value.clone(),
                pulse: item.pulse,
                at: cx.now,
            };
            match self.config.sink {
                TapSinkKind::Log => cx.sink.emit(ShimEvent::Tapped {
                    node: cx.node.clone(),
                    label: self.config.label.clone(),
                    pulse: record.pulse,
                    value: record.value,
                    at: record.at,
                }),
                TapSinkKind::Buffer => {
                    if self.buffer.len() == self.buffer_size {
                        self.buffer.pop_front();
                    }
                    self.buffer.push_back(record);
                }
                TapSinkKind::Callback => {
                    if let Some(callback) = &self.callback {
                        callback(&record);
                    }
                }
            }
        }
        Admission::Pass(item)
    }

    fn tap_records(&self) -> Vec<TapRecord> {
        self.buffer.iter().cloned().collect()
    }
}

#![cfg(test)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{Event, Subscriber, span};
use tracing_core::field::{Field, Visit};
use tracing_subscriber::registry;
use tracing_subscriber::{Layer, layer::Context, registry::LookupSpan};

#[derive(Default, Debug)]
pub struct CapturedSpan {
    pub name: String,
    pub fields: Mutex<HashMap<String, String>>, // stringified values; &str recorded unquoted
}

#[derive(Debug, Clone)]
pub struct CapturedEvent {
    pub target: String,
    pub level: tracing::Level,
    pub fields: HashMap<String, String>,
}

#[derive(Default, Debug)]
pub struct CaptureStore {
    pub spans: Mutex<HashMap<tracing::span::Id, Arc<CapturedSpan>>>,
    pub events: Mutex<Vec<CapturedEvent>>,
}

impl CaptureStore {
    pub fn span_named(&self, name: &str) -> Option<Arc<CapturedSpan>> {
        self.spans
            .lock()
            .unwrap()
            .values()
            .find(|s| s.name == name)
            .cloned()
    }

    pub fn events_for(&self, target: &str) -> Vec<CapturedEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.target == target)
            .cloned()
            .collect()
    }
}

struct MapVisitor<'a> {
    map: &'a mut HashMap<String, String>,
}

impl Visit for MapVisitor<'_> {
    fn record_debug(&mut self, field: &Field, value: &dyn core::fmt::Debug) {
        self.map
            .insert(field.name().to_string(), format!("{value:?}"));
    }
    fn record_i64(&mut self, field: &Field, value: i64) {
        self.map.insert(field.name().to_string(), value.to_string());
    }
    fn record_u64(&mut self, field: &Field, value: u64) {
        self.map.insert(field.name().to_string(), value.to_string());
    }
    fn record_bool(&mut self, field: &Field, value: bool) {
        self.map.insert(field.name().to_string(), value.to_string());
    }
    fn record_str(&mut self, field: &Field, value: &str) {
        self.map.insert(field.name().to_string(), value.to_string());
    }
    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.map.insert(field.name().to_string(), format!("{value}"));
    }
}

#[derive(Clone)]
pub struct CaptureLayer {
    pub store: Arc<CaptureStore>,
}

impl<S> Layer<S> for CaptureLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, _ctx: Context<'_, S>) {
        let name = attrs.metadata().name().to_string();
        let data = Arc::new(CapturedSpan {
            name,
            ..Default::default()
        });
        {
            let mut map = data.fields.lock().unwrap();
            attrs.record(&mut MapVisitor { map: &mut map });
        }
        self.store.spans.lock().unwrap().insert(id.clone(), data);
    }

    fn on_record(&self, id: &span::Id, values: &span::Record<'_>, _ctx: Context<'_, S>) {
        if let Some(data) = self.store.spans.lock().unwrap().get(id) {
            let mut map = data.fields.lock().unwrap();
            values.record(&mut MapVisitor { map: &mut map });
        }
    }

    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut fields = HashMap::new();
        event.record(&mut MapVisitor { map: &mut fields });
        self.store.events.lock().unwrap().push(CapturedEvent {
            target: event.metadata().target().to_string(),
            level: *event.metadata().level(),
            fields,
        });
    }
}

/// Install a capturing subscriber as the thread default. Capture stops when
/// the returned guard drops.
pub fn install_capture() -> (Arc<CaptureStore>, tracing::subscriber::DefaultGuard) {
    use tracing_subscriber::prelude::*;
    let store = Arc::new(CaptureStore::default());
    let layer = CaptureLayer {
        store: store.clone(),
    };
    let subscriber = registry::Registry::default().with(layer);
    let guard = tracing::subscriber::set_default(subscriber);
    (store, guard)
}

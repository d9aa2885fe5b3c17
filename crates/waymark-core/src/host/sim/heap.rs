//! Object heap for the simulated page: plain objects, engine instances and
//! the values their methods hand out.

use std::collections::{BTreeMap, BTreeSet};

use crate::engine::EngineKind;
use crate::geo::Bounds;
use crate::host::{ConstructHook, HostError, HostValue, ListenerHook, MethodHook, NodeRef, ObjectRef};

pub(crate) const ENGINE_A_METHODS: &[&str] = &[
    "getBounds",
    "getDiv",
    "getZoom",
    "getCenter",
    "setCenter",
    "setZoom",
    "fitBounds",
    "panTo",
    "setOptions",
    "addListener",
];

pub(crate) const ENGINE_B_METHODS: &[&str] = &[
    "getBounds",
    "getContainer",
    "getZoom",
    "getCenter",
    "getPane",
    "setView",
    "setZoom",
    "fitBounds",
    "panTo",
    "invalidateSize",
    "on",
];

/// Live state of a simulated map instance.
pub(crate) struct SimMap {
    pub engine: EngineKind,
    pub bounds: Bounds,
    pub zoom: f64,
    pub container: NodeRef,
    pub overlay_pane: Option<NodeRef>,
    pub listeners: Vec<(String, ListenerHook)>,
}

pub(crate) enum ObjectKind {
    Plain,
    Map(SimMap),
    /// Lat/lng pair. `accessors` selects `lat()` methods over plain numbers.
    LatLng { lat: f64, lng: f64, accessors: bool },
    /// Bounds object with corner accessor methods.
    CornerBounds(Bounds),
    /// Bounds object with corner props and edge accessor methods.
    EdgeBounds(Bounds),
    Constructor {
        engine: EngineKind,
        prototype: ObjectRef,
        hook: Option<ConstructHook>,
    },
    Prototype {
        interposers: Vec<(Vec<String>, MethodHook)>,
    },
}

pub(crate) struct SimObject {
    pub props: BTreeMap<String, HostValue>,
    pub methods: BTreeSet<String>,
    /// Canned return values for methods of plain objects.
    pub returns: BTreeMap<String, HostValue>,
    pub prototype: Option<ObjectRef>,
    pub kind: ObjectKind,
    /// Every method call throws.
    pub poisoned: bool,
    /// Reading any of these props throws.
    pub throwing_props: BTreeSet<String>,
}

impl SimObject {
    pub fn new(kind: ObjectKind) -> Self {
        Self {
            props: BTreeMap::new(),
            methods: BTreeSet::new(),
            returns: BTreeMap::new(),
            prototype: None,
            kind,
            poisoned: false,
            throwing_props: BTreeSet::new(),
        }
    }
}

#[derive(Default)]
pub(crate) struct Heap {
    objects: Vec<SimObject>,
}

impl Heap {
    pub fn alloc(&mut self, object: SimObject) -> ObjectRef {
        let handle = ObjectRef(self.objects.len() as u64);
        self.objects.push(object);
        handle
    }

    pub fn plain(&mut self, props: Vec<(String, HostValue)>) -> ObjectRef {
        let mut object = SimObject::new(ObjectKind::Plain);
        object.props.extend(props);
        self.alloc(object)
    }

    pub fn get(&self, object: ObjectRef) -> Result<&SimObject, HostError> {
        self.objects.get(object.0 as usize).ok_or(HostError::Stale {
            kind: "object",
            id: object.0,
        })
    }

    pub fn get_mut(&mut self, object: ObjectRef) -> Result<&mut SimObject, HostError> {
        self.objects
            .get_mut(object.0 as usize)
            .ok_or(HostError::Stale {
                kind: "object",
                id: object.0,
            })
    }

    /// Own methods first, then along the prototype chain.
    pub fn has_method(&self, object: ObjectRef, name: &str) -> bool {
        let mut current = Some(object);
        let mut hops = 0;
        while let Some(handle) = current {
            let Ok(obj) = self.get(handle) else {
                return false;
            };
            if obj.methods.contains(name) {
                return true;
            }
            current = obj.prototype;
            hops += 1;
            if hops > 32 {
                return false;
            }
        }
        false
    }

    /// Hooks interposed on `method` anywhere along the prototype chain.
    pub fn interposers_for(&self, object: ObjectRef, method: &str) -> Vec<MethodHook> {
        let mut hooks = Vec::new();
        let mut current = self.get(object).ok().and_then(|o| o.prototype);
        let mut hops = 0;
        while let Some(handle) = current {
            let Ok(obj) = self.get(handle) else {
                break;
            };
            if let ObjectKind::Prototype { interposers } = &obj.kind {
                for (methods, hook) in interposers {
                    if methods.iter().any(|m| m == method) {
                        hooks.push(hook.clone());
                    }
                }
            }
            current = obj.prototype;
            hops += 1;
            if hops > 32 {
                break;
            }
        }
        hooks
    }

    pub fn lat_lng(&mut self, lat: f64, lng: f64, accessors: bool) -> ObjectRef {
        let mut object = SimObject::new(ObjectKind::LatLng {
            lat,
            lng,
            accessors,
        });
        if accessors {
            object.methods.extend(["lat".to_string(), "lng".to_string()]);
        } else {
            object.props.insert("lat".to_string(), HostValue::Number(lat));
            object.props.insert("lng".to_string(), HostValue::Number(lng));
        }
        self.alloc(object)
    }

    /// Bounds in the shape the given engine hands out from `getBounds()`.
    pub fn bounds_object(&mut self, engine: EngineKind, bounds: Bounds) -> ObjectRef {
        match engine {
            EngineKind::EngineB => {
                let ne = self.lat_lng(bounds.north, bounds.east, false);
                let sw = self.lat_lng(bounds.south, bounds.west, false);
                let mut object = SimObject::new(ObjectKind::EdgeBounds(bounds));
                object
                    .props
                    .insert("_northEast".to_string(), HostValue::Object(ne));
                object
                    .props
                    .insert("_southWest".to_string(), HostValue::Object(sw));
                object.methods.extend(
                    ["getNorth", "getSouth", "getEast", "getWest"]
                        .iter()
                        .map(|s| s.to_string()),
                );
                self.alloc(object)
            }
            _ => {
                let mut object = SimObject::new(ObjectKind::CornerBounds(bounds));
                object.methods.extend(
                    ["getNorthEast", "getSouthWest", "toJSON"]
                        .iter()
                        .map(|s| s.to_string()),
                );
                self.alloc(object)
            }
        }
    }

    /// Plain `{north, south, east, west}` literal.
    pub fn bounds_literal(&mut self, bounds: Bounds) -> ObjectRef {
        self.plain(vec![
            ("north".to_string(), HostValue::Number(bounds.north)),
            ("south".to_string(), HostValue::Number(bounds.south)),
            ("east".to_string(), HostValue::Number(bounds.east)),
            ("west".to_string(), HostValue::Number(bounds.west)),
        ])
    }

    /// Read bounds back out of any shape this heap produces.
    pub fn bounds_from_value(&self, value: &HostValue) -> Option<Bounds> {
        let obj = self.get(value.as_object()?).ok()?;
        match &obj.kind {
            ObjectKind::CornerBounds(b) | ObjectKind::EdgeBounds(b) => Some(*b),
            _ => {
                let num = |k: &str| obj.props.get(k).and_then(|v| v.as_f64());
                Bounds::new(num("north")?, num("south")?, num("east")?, num("west")?).ok()
            }
        }
    }

    pub fn lat_lng_from_value(&self, value: &HostValue) -> Option<(f64, f64)> {
        let obj = self.get(value.as_object()?).ok()?;
        match &obj.kind {
            ObjectKind::LatLng { lat, lng, .. } => Some((*lat, *lng)),
            _ => {
                let lat = obj.props.get("lat").and_then(|v| v.as_f64())?;
                let lng = obj.props.get("lng").and_then(|v| v.as_f64())?;
                Some((lat, lng))
            }
        }
    }
}

/// Bounds recentred on `(lat, lng)` keeping the same span.
pub(crate) fn recentre(bounds: Bounds, lat: f64, lng: f64) -> Bounds {
    let half_lat = (bounds.north - bounds.south) / 2.0;
    let half_lng = bounds.lng_span() / 2.0;
    Bounds {
        north: lat + half_lat,
        south: lat - half_lat,
        east: lng + half_lng,
        west: lng - half_lng,
    }
}

/// Bounds scaled around their centre by `2^(old - new)`.
pub(crate) fn rezoom(bounds: Bounds, old_zoom: f64, new_zoom: f64) -> Bounds {
    let factor = 2f64.powf(old_zoom - new_zoom);
    let centre_lat = (bounds.north + bounds.south) / 2.0;
    let centre_lng = bounds.west + bounds.lng_span() / 2.0;
    let half_lat = (bounds.north - bounds.south) / 2.0 * factor;
    let half_lng = bounds.lng_span() / 2.0 * factor;
    Bounds {
        north: centre_lat + half_lat,
        south: centre_lat - half_lat,
        east: centre_lng + half_lng,
        west: centre_lng - half_lng,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_lookup_follows_prototype() {
        let mut heap = Heap::default();
        let mut proto = SimObject::new(ObjectKind::Prototype {
            interposers: Vec::new(),
        });
        proto.methods.insert("getBounds".to_string());
        let proto = heap.alloc(proto);
        let mut instance = SimObject::new(ObjectKind::Plain);
        instance.prototype = Some(proto);
        let instance = heap.alloc(instance);

        assert!(heap.has_method(instance, "getBounds"));
        assert!(!heap.has_method(instance, "getDiv"));
    }

    #[test]
    fn test_bounds_shapes_roundtrip() {
        let mut heap = Heap::default();
        let bounds = Bounds::new(2.0, 1.0, 4.0, 3.0).unwrap();
        for engine in [EngineKind::EngineA, EngineKind::EngineB] {
            let obj = heap.bounds_object(engine, bounds);
            assert_eq!(heap.bounds_from_value(&HostValue::Object(obj)), Some(bounds));
        }
        let literal = heap.bounds_literal(bounds);
        assert_eq!(heap.bounds_from_value(&HostValue::Object(literal)), Some(bounds));
    }

    #[test]
    fn test_rezoom_halves_span() {
        let bounds = Bounds::new(10.0, -10.0, 20.0, -20.0).unwrap();
        let zoomed = rezoom(bounds, 5.0, 6.0);
        assert!((zoomed.north - 5.0).abs() < 1e-9);
        assert!((zoomed.east - 10.0).abs() < 1e-9);
    }
}

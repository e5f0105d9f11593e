//! PROPFIND request parsing and live/dead property assembly (§4.4, §4.6),
//! built on this engine's `ResourceKind`/`PropertyStore` and trimmed to the
//! `DAV:` core property set.

use std::collections::HashMap;

use http::StatusCode;
use xmltree::Element;

use super::{element_children, PropNode, PropStatGroup, DAV_NS};
use crate::error::DavError;
use crate::fs::ResourceKind;
use crate::locks::Lock;
use crate::path::DavPath;
use crate::props::{DavProp, QName};
use crate::util::{systemtime_to_httpdate, systemtime_to_rfc3339};

/// What a PROPFIND request body asked for.
pub enum PropfindQuery {
    /// Every live and dead property (§4.6): empty body, or an explicit
    /// `<allprop/>`.
    AllProp,
    /// Just the property names, no values.
    PropName,
    /// A specific list of properties.
    Prop(Vec<QName>),
}

/// The live property names this engine serves, in the order `allprop`/
/// `propname` enumerate them.
const LIVE_PROP_NAMES: &[&str] = &[
    "creationdate",
    "displayname",
    "getcontentlength",
    "getcontenttype",
    "getetag",
    "getlastmodified",
    "lockdiscovery",
    "resourcetype",
    "supportedlock",
];

/// Parses a PROPFIND request body. An empty or malformed body is treated
/// as `<allprop/>` (§4.6: PROPFIND with no body means "all properties").
pub fn parse_request(body: &[u8]) -> PropfindQuery {
    if body.is_empty() {
        return PropfindQuery::AllProp;
    }
    let root = match Element::parse(body) {
        Ok(e) => e,
        Err(_) => return PropfindQuery::AllProp,
    };
    if root.name != "propfind" {
        return PropfindQuery::AllProp;
    }
    for child in element_children(&root) {
        match child.name.as_str() {
            "allprop" => return PropfindQuery::AllProp,
            "propname" => return PropfindQuery::PropName,
            "prop" => {
                let names = element_children(child)
                    .map(|c| QName::new(c.namespace.clone().unwrap_or_default(), c.name.clone()))
                    .collect();
                return PropfindQuery::Prop(names);
            },
            _ => {},
        }
    }
    PropfindQuery::AllProp
}

/// Computes the live value for `name` against `kind`/`path`, or `None` if
/// this engine doesn't serve that name as a live property (the caller then
/// falls back to the dead property store).
fn live_prop(
    name: &QName,
    kind: &ResourceKind,
    path: &DavPath,
    etag: Option<&str>,
    locks: &[Lock],
) -> Option<PropNode> {
    if !name.ns.is_empty() && name.ns != DAV_NS {
        return None;
    }
    match name.name.as_str() {
        "resourcetype" => Some(PropNode::ResourceType { collection: kind.is_collection() }),
        "displayname" => Some(PropNode::Text {
            ns: DAV_NS.to_string(),
            name: "displayname".to_string(),
            value: path.file_name().to_string(),
        }),
        "getcontentlength" if !kind.is_collection() => kind.meta().map(|m| PropNode::Text {
            ns: DAV_NS.to_string(),
            name: "getcontentlength".to_string(),
            value: m.len.to_string(),
        }),
        "getcontenttype" if !kind.is_collection() => Some(PropNode::Text {
            ns: DAV_NS.to_string(),
            name: "getcontenttype".to_string(),
            value: path.mime_type_str().to_string(),
        }),
        "getetag" => etag.map(|e| PropNode::Text {
            ns: DAV_NS.to_string(),
            name: "getetag".to_string(),
            value: e.to_string(),
        }),
        "getlastmodified" => kind.meta().map(|m| PropNode::Text {
            ns: DAV_NS.to_string(),
            name: "getlastmodified".to_string(),
            value: systemtime_to_httpdate(m.modified),
        }),
        "creationdate" => kind.meta().map(|m| PropNode::Text {
            ns: DAV_NS.to_string(),
            name: "creationdate".to_string(),
            value: systemtime_to_rfc3339(m.modified),
        }),
        "lockdiscovery" => Some(PropNode::LockDiscovery(locks.to_vec())),
        "supportedlock" => Some(PropNode::SupportedLock),
        _ => None,
    }
}

/// Builds the `<propstat>` groups for one resource, given the live
/// attributes of `kind`/`path` and its dead properties from the store.
///
/// `Prop` queries that name something neither live nor stored produce a
/// second group at 404, per §4.6's property-level status rule: PROPFIND
/// never fails a whole resource because one requested property is absent.
pub fn build_propstats(
    kind: &ResourceKind,
    path: &DavPath,
    etag: Option<&str>,
    locks: &[Lock],
    dead: &HashMap<QName, DavProp>,
    query: &PropfindQuery,
) -> Vec<PropStatGroup> {
    match query {
        PropfindQuery::PropName => {
            let mut names: Vec<QName> = LIVE_PROP_NAMES.iter().map(|n| QName::new(DAV_NS, *n)).collect();
            names.extend(dead.keys().cloned());
            let props = names.into_iter().map(|n| PropNode::Empty { ns: n.ns, name: n.name }).collect();
            vec![PropStatGroup { status: StatusCode::OK, props }]
        },
        PropfindQuery::AllProp => {
            let mut props = Vec::new();
            for n in LIVE_PROP_NAMES {
                if let Some(p) = live_prop(&QName::new(DAV_NS, *n), kind, path, etag, locks) {
                    props.push(p);
                }
            }
            for prop in dead.values() {
                props.push(PropNode::from_dav_prop(prop));
            }
            vec![PropStatGroup { status: StatusCode::OK, props }]
        },
        PropfindQuery::Prop(names) => {
            let mut found = Vec::new();
            let mut missing = Vec::new();
            for n in names {
                if let Some(p) = live_prop(n, kind, path, etag, locks) {
                    found.push(p);
                    continue;
                }
                if let Some(d) = dead.get(n) {
                    found.push(PropNode::from_dav_prop(d));
                    continue;
                }
                missing.push(n.clone());
            }
            let mut groups = vec![PropStatGroup { status: StatusCode::OK, props: found }];
            if !missing.is_empty() {
                groups.push(PropStatGroup {
                    status: StatusCode::NOT_FOUND,
                    props: missing.into_iter().map(|n| PropNode::Empty { ns: n.ns, name: n.name }).collect(),
                });
            }
            groups
        },
    }
}

/// The hard ceiling on PROPFIND `Depth: infinity` traversal (§4.6): guards
/// against symlink cycles in filesystem backends that don't otherwise
/// detect them.
pub const MAX_TRAVERSAL_DEPTH: u32 = 10;

pub fn too_deep() -> DavError {
    DavError::BadRequest("PROPFIND traversal exceeded the depth ceiling")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_body_is_allprop() {
        assert!(matches!(parse_request(b""), PropfindQuery::AllProp));
    }

    #[test]
    fn explicit_allprop() {
        let body = br#"<?xml version="1.0"?><propfind xmlns="DAV:"><allprop/></propfind>"#;
        assert!(matches!(parse_request(body), PropfindQuery::AllProp));
    }

    #[test]
    fn propname_request() {
        let body = br#"<?xml version="1.0"?><propfind xmlns="DAV:"><propname/></propfind>"#;
        assert!(matches!(parse_request(body), PropfindQuery::PropName));
    }

    #[test]
    fn named_prop_list() {
        let body = br#"<?xml version="1.0"?>
            <propfind xmlns="DAV:"><prop><displayname/><getetag/></prop></propfind>"#;
        match parse_request(body) {
            PropfindQuery::Prop(names) => {
                assert_eq!(names.len(), 2);
                assert_eq!(names[0].name, "displayname");
                assert_eq!(names[1].name, "getetag");
            },
            _ => panic!("expected Prop query"),
        }
    }

    #[test]
    fn malformed_body_falls_back_to_allprop() {
        assert!(matches!(parse_request(b"<not valid"), PropfindQuery::AllProp));
    }

    #[test]
    fn missing_named_prop_gets_404_group() {
        let path = DavPath::parse("/missing.txt", "").unwrap();
        let kind = ResourceKind::Null;
        let query = PropfindQuery::Prop(vec![QName::new("", "nonexistent-prop")]);
        let groups = build_propstats(&kind, &path, None, &[], &HashMap::new(), &query);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].status, StatusCode::NOT_FOUND);
    }
}

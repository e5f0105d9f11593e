//! LOCK request parsing and response body (§4.5, §4.6). Reuses the
//! `PropNode::LockDiscovery` writer in the parent module so the LOCK
//! response and the `lockdiscovery` property PROPFIND returns stay
//! byte-for-byte consistent.

use bytes::Bytes;
use xml::common::XmlVersion;
use xml::writer::XmlEvent as XmlWEvent;
use xmltree::Element;

use super::{element_children, element_text, new_emitter, write_prop_node, NsTable, PropNode, DAV_NS};
use crate::error::{DavError, DavResult};
use crate::locks::{Lock, LockScope};

/// A parsed `<lockinfo>` body. `None` from [`parse_request`] means the
/// request carried no body at all, i.e. a lock refresh (§4.5).
pub struct LockRequest {
    pub scope: LockScope,
    pub owner: Option<String>,
}

pub fn parse_request(body: &[u8]) -> DavResult<Option<LockRequest>> {
    if body.is_empty() {
        return Ok(None);
    }
    let root = Element::parse(body).map_err(|_| DavError::BadRequest("malformed LOCK XML"))?;
    if root.name != "lockinfo" {
        return Err(DavError::BadRequest("expected a lockinfo document"));
    }

    let mut scope = LockScope::Exclusive;
    let mut owner = None;
    for child in element_children(&root) {
        match child.name.as_str() {
            "lockscope" => {
                if element_children(child).any(|c| c.name == "shared") {
                    scope = LockScope::Shared;
                }
            },
            "owner" => {
                owner = element_children(child)
                    .find(|c| c.name == "href")
                    .map(element_text)
                    .or_else(|| Some(element_text(child)))
                    .filter(|s| !s.is_empty());
            },
            _ => {},
        }
    }
    Ok(Some(LockRequest { scope, owner }))
}

/// Builds the `<D:prop><D:lockdiscovery>...</D:lockdiscovery></D:prop>`
/// document a successful LOCK or LOCK-refresh response carries.
pub fn build_response(lock: &Lock) -> DavResult<Bytes> {
    let mut emitter = new_emitter();
    emitter.write(XmlWEvent::StartDocument { version: XmlVersion::Version10, encoding: Some("utf-8"), standalone: None })?;
    emitter.write(XmlWEvent::start_element("D:prop").ns("D", DAV_NS))?;
    let mut ns = NsTable::new();
    write_prop_node(&mut emitter, &mut ns, &PropNode::LockDiscovery(vec![lock.clone()]))?;
    emitter.write(XmlWEvent::end_element())?;
    Ok(emitter.inner_mut().take())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    #[test]
    fn empty_body_means_refresh() {
        assert!(parse_request(b"").unwrap().is_none());
    }

    #[test]
    fn parses_exclusive_default() {
        let body = br#"<?xml version="1.0"?>
            <lockinfo xmlns="DAV:">
              <lockscope><exclusive/></lockscope>
              <locktype><write/></locktype>
              <owner><href>http://example.com/jane</href></owner>
            </lockinfo>"#;
        let req = parse_request(body).unwrap().unwrap();
        assert_eq!(req.scope, LockScope::Exclusive);
        assert_eq!(req.owner.as_deref(), Some("http://example.com/jane"));
    }

    #[test]
    fn parses_shared_scope_and_text_owner() {
        let body = br#"<?xml version="1.0"?>
            <lockinfo xmlns="DAV:">
              <lockscope><shared/></lockscope>
              <locktype><write/></locktype>
              <owner>jane</owner>
            </lockinfo>"#;
        let req = parse_request(body).unwrap().unwrap();
        assert_eq!(req.scope, LockScope::Shared);
        assert_eq!(req.owner.as_deref(), Some("jane"));
    }

    #[test]
    fn response_contains_lockdiscovery() {
        let lock = Lock {
            token: "opaquelocktoken:abc".to_string(),
            path: "/a.txt".to_string(),
            scope: LockScope::Exclusive,
            owner: None,
            created: SystemTime::now(),
            timeout: None,
            depth: crate::locks::LockDepth::Zero,
        };
        let bytes = build_response(&lock).unwrap();
        let xml = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(xml.contains("D:lockdiscovery"));
        assert!(xml.contains("opaquelocktoken:abc"));
    }
}

//! PROPPATCH request parsing (§4.4): an ordered sequence of `<set>`/
//! `<remove>` blocks, each applied independently against the property
//! store (no all-or-nothing transaction — every property gets its own
//! status in the response, per §4.6).

use super::{element_children, serialize_inner};
use crate::error::{DavError, DavResult};
use crate::props::{DavProp, QName};
use xmltree::Element;

/// One property mutation named by the request body, in document order.
pub enum PatchOp {
    Set(DavProp),
    Remove(QName),
}

/// Parses a PROPPATCH body into its ordered list of operations.
///
/// Unlike PROPFIND, an empty or malformed body is a client error (§4.6):
/// there's no sensible default interpretation for "patch nothing".
pub fn parse_request(body: &[u8]) -> DavResult<Vec<PatchOp>> {
    if body.is_empty() {
        return Err(DavError::BadRequest("PROPPATCH body must not be empty"));
    }
    let root = Element::parse(body).map_err(|_| DavError::BadRequest("malformed PROPPATCH XML"))?;
    if root.name != "propertyupdate" {
        return Err(DavError::BadRequest("expected a propertyupdate document"));
    }

    let mut ops = Vec::new();
    for directive in element_children(&root) {
        match directive.name.as_str() {
            "set" => {
                let Some(prop_el) = element_children(directive).find(|c| c.name == "prop") else { continue };
                for p in element_children(prop_el) {
                    let name = QName::new(p.namespace.clone().unwrap_or_default(), p.name.clone());
                    ops.push(PatchOp::Set(DavProp { name, xml: serialize_inner(p) }));
                }
            },
            "remove" => {
                let Some(prop_el) = element_children(directive).find(|c| c.name == "prop") else { continue };
                for p in element_children(prop_el) {
                    ops.push(PatchOp::Remove(QName::new(p.namespace.clone().unwrap_or_default(), p.name.clone())));
                }
            },
            _ => {},
        }
    }

    if ops.is_empty() {
        return Err(DavError::BadRequest("PROPPATCH body named no set/remove directives"));
    }
    Ok(ops)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_body_is_rejected() {
        assert!(parse_request(b"").is_err());
    }

    #[test]
    fn parses_set_and_remove_in_order() {
        let body = br#"<?xml version="1.0"?>
            <propertyupdate xmlns="DAV:">
              <set><prop><author>jane</author></prop></set>
              <remove><prop><expired-flag/></prop></remove>
            </propertyupdate>"#;
        let ops = parse_request(body).unwrap();
        assert_eq!(ops.len(), 2);
        match &ops[0] {
            PatchOp::Set(p) => {
                assert_eq!(p.name.name, "author");
                assert_eq!(p.xml, "jane");
            },
            _ => panic!("expected Set"),
        }
        match &ops[1] {
            PatchOp::Remove(n) => assert_eq!(n.name, "expired-flag"),
            _ => panic!("expected Remove"),
        }
    }

    #[test]
    fn rejects_non_propertyupdate_root() {
        let body = br#"<?xml version="1.0"?><propfind xmlns="DAV:"><allprop/></propfind>"#;
        assert!(parse_request(body).is_err());
    }

    #[test]
    fn nested_element_value_is_preserved() {
        let body = br#"<?xml version="1.0"?>
            <propertyupdate xmlns="DAV:">
              <set><prop><metadata><tag>a</tag><tag>b</tag></metadata></prop></set>
            </propertyupdate>"#;
        let ops = parse_request(body).unwrap();
        match &ops[0] {
            PatchOp::Set(p) => assert_eq!(p.xml, "<tag>a</tag><tag>b</tag>"),
            _ => panic!("expected Set"),
        }
    }
}

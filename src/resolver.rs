//! Maps a template that names a predicted element (`B3`, `C1`, ...) onto the
//! live screen.

use tracing::debug;

use crate::action::{parse_template, Action, ElementRef};
use crate::error::Result;
use crate::predictor::SpeculativeNode;
use crate::ui::{ElementSchema, UiElement};

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAction {
    pub action: Action,
    /// Identity of the live element the action was bound to.
    pub identity: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ActionResolver {
    schema: ElementSchema,
}

impl ActionResolver {
    pub fn new(schema: ElementSchema) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> ElementSchema {
        self.schema
    }

    /// Parse `template` and bind its element to the live screen.
    ///
    /// A malformed template is an error. A symbolic id that is not among the
    /// node's elements, or whose identity is not on the live screen, yields
    /// `Ok(None)`. Templates without an element, or with a concrete point,
    /// come back unchanged with no identity.
    pub fn resolve(&self, template: &str, node: &SpeculativeNode, live: &[UiElement]) -> Result<Option<ResolvedAction>> {
        let mut action = parse_template(template)?;

        let symbolic = match action.element() {
            Some(ElementRef::Symbolic(id)) => id.clone(),
            _ => return Ok(Some(ResolvedAction { action, identity: None })),
        };

        let Some(stored) = node.element_by_id(&symbolic) else {
            debug!(template, element = %symbolic, "element id not in predicted node");
            return Ok(None);
        };
        let wanted = self.schema.identity(stored);

        let Some(found) = live.iter().find(|e| self.schema.identity(e) == wanted) else {
            debug!(template, identity = %wanted, "no live element with matching identity");
            return Ok(None);
        };

        let (x, y) = found.bbox.center();
        action.set_element(ElementRef::Point { x, y });
        Ok(Some(ResolvedAction {
            action,
            identity: Some(wanted),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionKind;
    use crate::error::EngineError;
    use crate::graph::WorkAction;
    use crate::ui::BBox;

    fn node(elements: Vec<UiElement>, index: usize) -> SpeculativeNode {
        let mut n = SpeculativeNode {
            node_id: "n".into(),
            elements,
            source_workflow: "wf".into(),
            transition_action: WorkAction::new(ActionKind::Tap, "", None),
            ids: Vec::new(),
        };
        n.assign_ids(index);
        n
    }

    fn rich(content: &str, id: &str, bbox: BBox) -> UiElement {
        UiElement::new(content, bbox).with_identity(id, "android.widget.Button")
    }

    #[test]
    fn test_binds_symbolic_id_to_live_center() {
        let stored = node(
            vec![
                rich("Cancel", "id/cancel", BBox::new(0, 0, 10, 10)),
                rich("Send", "id/send", BBox::new(0, 0, 10, 10)),
            ],
            0,
        );
        let live = vec![
            rich("Send", "id/send", BBox::new(100, 200, 300, 400)),
            rich("Cancel", "id/cancel", BBox::new(0, 0, 50, 50)),
        ];
        let resolver = ActionResolver::new(ElementSchema::Rich);
        let out = resolver
            .resolve(r#"do(action="Tap", element="B2")"#, &stored, &live)
            .unwrap()
            .unwrap();
        assert_eq!(out.action, Action::Tap { element: Some(ElementRef::Point { x: 200, y: 300 }) });
        assert_eq!(out.identity.as_deref(), Some("id/send/android.widget.Button/Send"));

        let again = resolver
            .resolve(r#"do(action="Tap", element="B2")"#, &stored, &live)
            .unwrap()
            .unwrap();
        assert_eq!(again, out);
    }

    #[test]
    fn test_rich_schema_requires_identity_fields_to_agree() {
        let stored = node(vec![rich("OK", "id/ok", BBox::default())], 1);
        let live = vec![rich("OK", "id/other", BBox::new(0, 0, 10, 10))];
        let template = r#"do(action="Tap", element="C1")"#;

        assert!(ActionResolver::new(ElementSchema::Rich)
            .resolve(template, &stored, &live)
            .unwrap()
            .is_none());
        let reduced = ActionResolver::new(ElementSchema::Reduced)
            .resolve(template, &stored, &live)
            .unwrap()
            .unwrap();
        assert_eq!(reduced.identity.as_deref(), Some("OK"));
    }

    #[test]
    fn test_unknown_id_is_a_miss_not_an_error() {
        let stored = node(vec![rich("OK", "id/ok", BBox::default())], 0);
        let out = ActionResolver::default()
            .resolve(r#"do(action="Tap", element="B9")"#, &stored, &[])
            .unwrap();
        assert!(out.is_none());
    }

    #[test]
    fn test_passthrough_without_symbolic_element() {
        let stored = node(Vec::new(), 0);
        let resolver = ActionResolver::default();

        let back = resolver.resolve(r#"do(action="Back")"#, &stored, &[]).unwrap().unwrap();
        assert_eq!(back.action, Action::Back);
        assert!(back.identity.is_none());

        let point = resolver
            .resolve(r#"do(action="Tap", element=[12, 34])"#, &stored, &[])
            .unwrap()
            .unwrap();
        assert_eq!(point.action.element(), Some(&ElementRef::Point { x: 12, y: 34 }));
        assert!(point.identity.is_none());
    }

    #[test]
    fn test_non_string_element_passes_through_without_identity() {
        let stored = node(Vec::new(), 0);
        let out = ActionResolver::default()
            .resolve(r#"do(action="Tap", element=5)"#, &stored, &[])
            .unwrap()
            .unwrap();
        assert_eq!(out.action, Action::Tap { element: Some(ElementRef::Unbound("5".into())) });
        assert!(out.identity.is_none());
    }

    #[test]
    fn test_malformed_template_is_an_error() {
        let stored = node(Vec::new(), 0);
        let err = ActionResolver::default()
            .resolve("do(action=\"Tap\", element=B1", &stored, &[])
            .unwrap_err();
        assert!(matches!(err, EngineError::Parse(_)));
    }
}

use super::{
    well_known_resource_id, Attribute, Element, ManifestDocument, TypedValue, ANDROID_NAMESPACE,
};
use crate::error::Error;
use crate::Result;

/// The two fields the orchestrator needs before deciding anything.
#[derive(Clone, Debug, Default)]
pub struct ManifestIdentity {
    pub package_name: Option<String>,
    pub app_component_factory: Option<String>,
}

/// Read-only extraction of the package name and the application's component
/// factory. Never mutates the input.
pub fn query_identity(bytes: &[u8]) -> Result<ManifestIdentity> {
    let doc = ManifestDocument::parse(bytes)?;
    let package_name = doc
        .root
        .attribute(None, "package")
        .and_then(string_value);
    let app_component_factory = doc
        .root
        .child("application")
        .and_then(|app| app.attribute(Some(ANDROID_NAMESPACE), "appComponentFactory"))
        .and_then(string_value);
    Ok(ManifestIdentity {
        package_name,
        app_component_factory,
    })
}

fn string_value(attr: &Attribute) -> Option<String> {
    match &attr.value {
        TypedValue::Str(s) => Some(s.clone()),
        _ => None,
    }
}

fn android_attribute(name: &str, value: TypedValue) -> Attribute {
    Attribute {
        namespace: Some(ANDROID_NAMESPACE.to_string()),
        name: name.to_string(),
        resource_id: well_known_resource_id(name),
        value,
    }
}

impl ManifestDocument {
    fn application_mut(&mut self) -> Result<&mut Element> {
        self.root
            .child_mut("application")
            .ok_or_else(|| Error::MalformedManifest("no application element".into()))
    }

    /// Appends a `uses-permission` child unless the permission is already
    /// declared. Returns whether anything was added.
    pub fn add_uses_permission(&mut self, permission: &str) -> bool {
        let declared = self.root.children_named("uses-permission").any(|c| {
            c.attribute(Some(ANDROID_NAMESPACE), "name")
                .and_then(string_value)
                .as_deref()
                == Some(permission)
        });
        if declared {
            return false;
        }
        let mut element = Element::new("uses-permission");
        element.attributes.push(android_attribute(
            "name",
            TypedValue::Str(permission.to_string()),
        ));
        // keep permissions ahead of the application element, aapt style
        let at = self
            .root
            .children
            .iter()
            .position(|c| c.name == "application")
            .unwrap_or(self.root.children.len());
        self.root.children.insert(at, element);
        self.register_resource_id("name", super::RES_ID_NAME);
        true
    }

    /// Replaces or inserts an attribute on the single `application`
    /// element. A replaced string attribute stays a string; replacing a
    /// non-string value with a string is an explicit type change and is
    /// logged.
    pub fn set_application_attribute(&mut self, name: &str, value: &str) -> Result<()> {
        let resource_id = well_known_resource_id(name);
        let application = self.application_mut()?;
        match application.attribute_mut(Some(ANDROID_NAMESPACE), name) {
            Some(attr) => {
                if !matches!(attr.value, TypedValue::Str(_)) {
                    tracing::debug!("attribute '{name}' changes type to string");
                }
                attr.value = TypedValue::Str(value.to_string());
            }
            None => {
                application.attributes.push(android_attribute(
                    name,
                    TypedValue::Str(value.to_string()),
                ));
            }
        }
        if let Some(id) = resource_id {
            self.register_resource_id(name, id);
        }
        Ok(())
    }

    /// Appends a `meta-data` child under the `application` element.
    pub fn add_meta_data(&mut self, key: &str, value: &str) -> Result<()> {
        let application = self.application_mut()?;
        let mut element = Element::new("meta-data");
        element
            .attributes
            .push(android_attribute("name", TypedValue::Str(key.to_string())));
        element
            .attributes
            .push(android_attribute("value", TypedValue::Str(value.to_string())));
        application.children.push(element);
        self.register_resource_id("name", super::RES_ID_NAME);
        self.register_resource_id("value", super::RES_ID_VALUE);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::axml::{RES_ID_APP_COMPONENT_FACTORY, RES_ID_NAME};

    const RES_ID_DEBUGGABLE: u32 = 0x0101_000f;

    /// A small compiled manifest built through the same serializer the
    /// patcher uses, standing in for aapt output.
    pub(crate) fn sample_manifest(package: &str, factory: Option<&str>) -> Vec<u8> {
        let mut application = Element::new("application");
        application.attributes.push(Attribute {
            namespace: Some(ANDROID_NAMESPACE.to_string()),
            name: "debuggable".to_string(),
            resource_id: Some(RES_ID_DEBUGGABLE),
            value: TypedValue::Boolean(false),
        });
        if let Some(factory) = factory {
            application.attributes.push(Attribute {
                namespace: Some(ANDROID_NAMESPACE.to_string()),
                name: "appComponentFactory".to_string(),
                resource_id: Some(RES_ID_APP_COMPONENT_FACTORY),
                value: TypedValue::Str(factory.to_string()),
            });
        }

        let mut root = Element::new("manifest");
        root.attributes.push(Attribute {
            namespace: None,
            name: "package".to_string(),
            resource_id: None,
            value: TypedValue::Str(package.to_string()),
        });
        root.children.push(application);

        let doc = ManifestDocument {
            root,
            namespaces: vec![("android".to_string(), ANDROID_NAMESPACE.to_string())],
            resource_map: Vec::new(),
        };
        doc.serialize().unwrap()
    }

    #[test]
    fn should_extract_identity_without_mutating() {
        let bytes = sample_manifest("com.facebook.orca", Some("android.app.AppComponentFactory"));
        let before = bytes.clone();
        let identity = query_identity(&bytes).unwrap();
        assert_eq!(identity.package_name.as_deref(), Some("com.facebook.orca"));
        assert_eq!(
            identity.app_component_factory.as_deref(),
            Some("android.app.AppComponentFactory")
        );
        assert_eq!(bytes, before);
    }

    #[test]
    fn should_rewrite_the_factory_in_place() {
        let bytes = sample_manifest("com.facebook.orca", Some("android.app.AppComponentFactory"));
        let mut doc = ManifestDocument::parse(&bytes).unwrap();
        doc.set_application_attribute("appComponentFactory", "org.mrv.loader.Stub")
            .unwrap();
        let out = doc.serialize().unwrap();
        let identity = query_identity(&out).unwrap();
        assert_eq!(
            identity.app_component_factory.as_deref(),
            Some("org.mrv.loader.Stub")
        );
        // still a string-typed attribute after the rewrite
        let doc = ManifestDocument::parse(&out).unwrap();
        let attr = doc
            .root
            .child("application")
            .unwrap()
            .attribute(Some(ANDROID_NAMESPACE), "appComponentFactory")
            .unwrap();
        assert!(matches!(attr.value, TypedValue::Str(_)));
        assert_eq!(attr.resource_id, Some(RES_ID_APP_COMPONENT_FACTORY));
    }

    #[test]
    fn should_insert_the_factory_when_absent() {
        let bytes = sample_manifest("com.facebook.orca", None);
        let mut doc = ManifestDocument::parse(&bytes).unwrap();
        doc.set_application_attribute("appComponentFactory", "org.mrv.loader.Stub")
            .unwrap();
        let identity = query_identity(&doc.serialize().unwrap()).unwrap();
        assert_eq!(
            identity.app_component_factory.as_deref(),
            Some("org.mrv.loader.Stub")
        );
    }

    #[test]
    fn should_add_a_permission_only_once() {
        let bytes = sample_manifest("com.facebook.orca", None);
        let mut doc = ManifestDocument::parse(&bytes).unwrap();
        assert!(doc.add_uses_permission("android.permission.QUERY_ALL_PACKAGES"));
        assert!(!doc.add_uses_permission("android.permission.QUERY_ALL_PACKAGES"));

        let out = doc.serialize().unwrap();
        let doc = ManifestDocument::parse(&out).unwrap();
        let permissions: Vec<_> = doc.root.children_named("uses-permission").collect();
        assert_eq!(permissions.len(), 1);
        let name = permissions[0]
            .attribute(Some(ANDROID_NAMESPACE), "name")
            .unwrap();
        assert_eq!(
            name.value,
            TypedValue::Str("android.permission.QUERY_ALL_PACKAGES".into())
        );
        assert_eq!(name.resource_id, Some(RES_ID_NAME));
    }

    #[test]
    fn should_append_meta_data_under_application() {
        let bytes = sample_manifest("com.facebook.orca", None);
        let mut doc = ManifestDocument::parse(&bytes).unwrap();
        doc.add_meta_data("mrv.extra.config", "eyJzaWduYXR1cmUiOiIifQ==")
            .unwrap();
        let out = doc.serialize().unwrap();
        let doc = ManifestDocument::parse(&out).unwrap();
        let app = doc.root.child("application").unwrap();
        let meta = app.child("meta-data").unwrap();
        assert_eq!(
            meta.attribute(Some(ANDROID_NAMESPACE), "name").unwrap().value,
            TypedValue::Str("mrv.extra.config".into())
        );
        assert_eq!(
            meta.attribute(Some(ANDROID_NAMESPACE), "value").unwrap().value,
            TypedValue::Str("eyJzaWduYXR1cmUiOiIifQ==".into())
        );
    }
}

//! CSDL XML rendering for `/$metadata`. Built with `quick-xml`'s
//! writer rather than hand-formatted strings, the way the metadata
//! registry itself is built through an explicit builder instead of derived
//! via reflection.

use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use std::io::Cursor;

use crate::dispatch::ODataVersion;
use crate::metadata::{Cardinality, EdmType, MetadataRegistry};

fn edm_xml_type(edm: EdmType) -> &'static str {
    edm.qualified_name()
}

pub fn render_csdl_xml(registry: &MetadataRegistry, version: ODataVersion) -> Result<String, quick_xml::Error> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;

    let mut edmx = BytesStart::new("edmx:Edmx");
    edmx.push_attribute(("xmlns:edmx", "http://docs.oasis-open.org/odata/ns/edmx"));
    edmx.push_attribute(("Version", version.as_str()));
    writer.write_event(Event::Start(edmx))?;

    writer.write_event(Event::Start(BytesStart::new("edmx:DataServices")))?;

    let mut schema = BytesStart::new("Schema");
    schema.push_attribute(("xmlns", "http://docs.oasis-open.org/odata/ns/edm"));
    schema.push_attribute(("Namespace", registry.namespace.as_str()));
    writer.write_event(Event::Start(schema))?;

    let mut type_names: Vec<&String> = registry.entity_types.keys().collect();
    type_names.sort();
    for qualified_name in &type_names {
        let entity = &registry.entity_types[*qualified_name];
        let mut el = BytesStart::new("EntityType");
        el.push_attribute(("Name", entity.type_name()));
        writer.write_event(Event::Start(el))?;

        writer.write_event(Event::Start(BytesStart::new("Key")))?;
        for key_prop in entity.key_properties() {
            let mut pref = BytesStart::new("PropertyRef");
            pref.push_attribute(("Name", key_prop.logical_name.as_str()));
            writer.write_event(Event::Empty(pref))?;
        }
        writer.write_event(Event::End(BytesEnd::new("Key")))?;

        for prop in entity.properties.iter().filter(|p| !p.is_excluded) {
            let mut pel = BytesStart::new("Property");
            pel.push_attribute(("Name", prop.logical_name.as_str()));
            pel.push_attribute(("Type", edm_xml_type(prop.edm_type)));
            pel.push_attribute(("Nullable", if prop.nullable { "true" } else { "false" }));
            if let Some(max_len) = prop.max_length {
                pel.push_attribute(("MaxLength", max_len.to_string().as_str()));
            }
            if let Some((precision, scale)) = prop.precision {
                pel.push_attribute(("Precision", precision.to_string().as_str()));
                pel.push_attribute(("Scale", scale.to_string().as_str()));
            }
            writer.write_event(Event::Empty(pel))?;
        }

        for nav in &entity.navigations {
            let mut nel = BytesStart::new("NavigationProperty");
            nel.push_attribute(("Name", nav.logical_name.as_str()));
            let type_attr = match nav.cardinality {
                Cardinality::Single => nav.target_type.clone(),
                Cardinality::Collection => format!("Collection({})", nav.target_type),
            };
            nel.push_attribute(("Type", type_attr.as_str()));
            nel.push_attribute(("Nullable", if nav.cardinality == Cardinality::Single { "true" } else { "false" }));
            writer.write_event(Event::Empty(nel))?;
        }

        writer.write_event(Event::End(BytesEnd::new("EntityType")))?;
    }

    let mut container = BytesStart::new("EntityContainer");
    container.push_attribute(("Name", registry.container_name.as_str()));
    writer.write_event(Event::Start(container))?;

    let mut set_names: Vec<&String> = registry.entity_sets.keys().collect();
    set_names.sort();
    for set_name in &set_names {
        let set = &registry.entity_sets[*set_name];
        let mut el = BytesStart::new("EntitySet");
        el.push_attribute(("Name", set.name.as_str()));
        el.push_attribute(("EntityType", set.entity_type.as_str()));
        let entity = registry.entity_types.get(&set.entity_type);
        let navs: Vec<_> = entity.map(|e| e.navigations.clone()).unwrap_or_default();
        if navs.is_empty() {
            writer.write_event(Event::Empty(el))?;
        } else {
            writer.write_event(Event::Start(el))?;
            for nav in &navs {
                let mut binding = BytesStart::new("NavigationPropertyBinding");
                binding.push_attribute(("Path", nav.logical_name.as_str()));
                binding.push_attribute(("Target", nav.target_set.as_str()));
                writer.write_event(Event::Empty(binding))?;
            }
            writer.write_event(Event::End(BytesEnd::new("EntitySet")))?;
        }
    }

    let mut singleton_names: Vec<&String> = registry.singletons.keys().collect();
    singleton_names.sort();
    for name in &singleton_names {
        let singleton = &registry.singletons[*name];
        let mut el = BytesStart::new("Singleton");
        el.push_attribute(("Name", singleton.name.as_str()));
        el.push_attribute(("Type", singleton.entity_type.as_str()));
        writer.write_event(Event::Empty(el))?;
    }

    writer.write_event(Event::End(BytesEnd::new("EntityContainer")))?;
    writer.write_event(Event::End(BytesEnd::new("Schema")))?;
    writer.write_event(Event::End(BytesEnd::new("edmx:DataServices")))?;
    writer.write_event(Event::End(BytesEnd::new("edmx:Edmx")))?;

    let bytes = writer.into_inner().into_inner();
    Ok(String::from_utf8(bytes).expect("quick-xml always emits valid utf-8"))
}

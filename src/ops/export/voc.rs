//! per-asset box-list XML

use std::fmt::Write;

use crate::types::{AssetAttributes, ContextRecord};

/// one object element: annotation plus its resolved class name
pub struct VocObject<'a> {
    pub class_name: &'a str,
    pub annotation: &'a crate::types::Annotation,
}

/// render the XML document for one asset
pub fn render(
    file_name: &str,
    attrs: &AssetAttributes,
    objects: &[VocObject<'_>],
    context: Option<&ContextRecord>,
) -> String {
    let mut out = String::new();
    // writing into a String cannot fail
    let _ = write_document(&mut out, file_name, attrs, objects, context);
    out
}

fn write_document(
    out: &mut String,
    file_name: &str,
    attrs: &AssetAttributes,
    objects: &[VocObject<'_>],
    context: Option<&ContextRecord>,
) -> std::fmt::Result {
    writeln!(out, "<annotation>")?;
    writeln!(out, "  <filename>{}</filename>", escape(file_name))?;
    writeln!(out, "  <size>")?;
    writeln!(out, "    <width>{}</width>", attrs.width)?;
    writeln!(out, "    <height>{}</height>", attrs.height)?;
    writeln!(out, "    <depth>{}</depth>", attrs.channels)?;
    writeln!(out, "  </size>")?;
    writeln!(out, "  <segmented>0</segmented>")?;

    if let Some(context) = context {
        writeln!(out, "  <image_quality>{}</image_quality>", context.image_quality)?;
        for (key, value) in &context.cks {
            writeln!(out, "  <ck key=\"{}\">{}</ck>", escape(key), escape(value))?;
        }
    }

    for object in objects {
        let a = object.annotation;
        writeln!(out, "  <object>")?;
        writeln!(out, "    <name>{}</name>", escape(object.class_name))?;
        writeln!(out, "    <pose>Unspecified</pose>")?;
        writeln!(out, "    <truncated>0</truncated>")?;
        writeln!(out, "    <difficult>0</difficult>")?;
        writeln!(out, "    <bndbox>")?;
        writeln!(out, "      <xmin>{}</xmin>", a.rect.x)?;
        writeln!(out, "      <ymin>{}</ymin>", a.rect.y)?;
        writeln!(out, "      <xmax>{}</xmax>", a.rect.x + a.rect.w)?;
        writeln!(out, "      <ymax>{}</ymax>", a.rect.y + a.rect.h)?;
        writeln!(out, "    </bndbox>")?;
        writeln!(out, "    <confidence>{}</confidence>", a.score)?;
        writeln!(out, "    <box_quality>{}</box_quality>", a.anno_quality)?;
        if !a.tags.is_empty() {
            writeln!(out, "    <tags>")?;
            for (key, value) in &a.tags {
                writeln!(out, "      <tag key=\"{}\">{}</tag>", escape(key), escape(value))?;
            }
            writeln!(out, "    </tags>")?;
        }
        writeln!(out, "  </object>")?;
    }

    writeln!(out, "</annotation>")
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Annotation, AssetType, Rect};

    #[test]
    fn test_render_objects() {
        let attrs = AssetAttributes {
            asset_type: AssetType::ImageJpeg,
            width: 500,
            height: 281,
            channels: 3,
            byte_size: 0,
        };
        let anno = Annotation::new(0, Rect::new(104, 78, 272, 105), 3)
            .with_score(1.0)
            .with_tag("fake tag name", "a<b");
        let objects = [VocObject {
            class_name: "airplane",
            annotation: &anno,
        }];

        let xml = render("d1.jpg", &attrs, &objects, None);

        assert!(xml.contains("<filename>d1.jpg</filename>"));
        assert!(xml.contains("<width>500</width>"));
        assert!(xml.contains("<name>airplane</name>"));
        assert!(xml.contains("<xmin>104</xmin>"));
        assert!(xml.contains("<xmax>376</xmax>"));
        assert!(xml.contains("<ymax>183</ymax>"));
        assert!(xml.contains("<tag key=\"fake tag name\">a&lt;b</tag>"));
        assert_eq!(xml.matches("<object>").count(), 1);
    }

    #[test]
    fn test_render_negative() {
        let xml = render("x.jpg", &AssetAttributes::default(), &[], None);
        assert!(!xml.contains("<object>"));
        assert!(xml.ends_with("</annotation>\n"));
    }
}

// src/manifest.rs

//! Image manifest parsing and serialization
//!
//! The manifest is the wire format shared by the sync (consumer) and
//! publish (producer) sides: a `pulp_image_manifest` root element with one
//! `image` child per image, all metadata carried as string attributes.
//! Both sides agree on the fixed [`MANIFEST_FILENAME`] at the root of a
//! served repository tree.
//!
//! Parsing is all-or-nothing: a document that is malformed or violates
//! the schema materializes zero records. An earlier format variant used
//! nested text elements instead of attributes; that legacy form is not
//! supported here.

use crate::error::{Error, Result};
use crate::image::{attrs, ImageRecord, Metadata};
use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};
use tracing::debug;

/// Filename the manifest is published to, at the root of the repository
/// tree. Fixed for interoperability with existing feeds.
pub const MANIFEST_FILENAME: &str = ".image-metadata.xml";

/// Root element name of the manifest document
pub const MANIFEST_ROOT: &str = "pulp_image_manifest";

/// Manifest format version emitted on publish
pub const MANIFEST_VERSION: &str = "1";

/// Attributes every image element must carry
pub const REQUIRED_ATTRS: [&str; 8] = [
    attrs::CHECKSUM,
    attrs::CONTAINER_FORMAT,
    attrs::DISK_FORMAT,
    attrs::FILENAME,
    attrs::MIN_DISK,
    attrs::MIN_RAM,
    attrs::NAME,
    attrs::SIZE,
];

/// Attributes that must parse as signed integers
const SIGNED_INT_ATTRS: [&str; 2] = [attrs::MIN_DISK, attrs::MIN_RAM];

/// Attributes that must parse as non-negative integers
const UNSIGNED_INT_ATTRS: [&str; 1] = [attrs::SIZE];

/// A parsed image manifest: an ordered sequence of image records
///
/// Read-only once constructed; the publish side builds a fresh document
/// from metadata fragments via [`ImageManifest::serialize`].
#[derive(Debug, Clone)]
pub struct ImageManifest {
    images: Vec<ImageRecord>,
}

impl ImageManifest {
    /// Parse a manifest document from its raw bytes
    ///
    /// Fails with [`Error::ParseError`] if the document is not well-formed
    /// XML and with [`Error::SchemaError`] if it is well-formed but missing
    /// a required attribute, carries a non-integer value in an
    /// integer-typed attribute, or has an unexpected element.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::from_reader(bytes);
        reader.trim_text(true);

        let mut buf = Vec::new();
        let mut images = Vec::new();
        let mut root_seen = false;

        loop {
            match reader.read_event_into(&mut buf) {
                Err(e) => {
                    return Err(Error::ParseError(format!("malformed manifest: {e}")));
                }
                Ok(Event::Eof) => break,
                Ok(Event::Start(element)) | Ok(Event::Empty(element)) => {
                    let name = String::from_utf8_lossy(element.name().as_ref()).into_owned();
                    if !root_seen {
                        if name != MANIFEST_ROOT {
                            return Err(Error::SchemaError(format!(
                                "unexpected root element '{name}', expected '{MANIFEST_ROOT}'"
                            )));
                        }
                        if let Some(version) = attribute_value(&element, "version")? {
                            if version != MANIFEST_VERSION {
                                debug!("manifest declares version {}", version);
                            }
                        }
                        root_seen = true;
                    } else if name == "image" {
                        images.push(parse_image_element(&element)?);
                    } else {
                        return Err(Error::SchemaError(format!(
                            "unexpected element '{name}' in manifest"
                        )));
                    }
                }
                Ok(_) => {}
            }
            buf.clear();
        }

        if !root_seen {
            return Err(Error::ParseError(
                "manifest document has no root element".to_string(),
            ));
        }

        debug!("parsed manifest with {} images", images.len());
        Ok(Self { images })
    }

    /// Serialize metadata fragments into a manifest document
    ///
    /// Deterministic: fragment order and per-fragment key order are
    /// preserved exactly as given, so the caller controls the published
    /// ordering. An empty fragment list produces a document with the root
    /// element and zero children.
    pub fn serialize(fragments: &[Metadata]) -> Result<Vec<u8>> {
        let mut writer = Writer::new(Vec::new());

        let mut root = BytesStart::new(MANIFEST_ROOT);
        root.push_attribute(("version", MANIFEST_VERSION));

        if fragments.is_empty() {
            writer
                .write_event(Event::Empty(root))
                .map_err(|e| Error::IoError(format!("failed to write manifest: {e}")))?;
        } else {
            writer
                .write_event(Event::Start(root))
                .map_err(|e| Error::IoError(format!("failed to write manifest: {e}")))?;
            for fragment in fragments {
                let mut element = BytesStart::new("image");
                for (key, value) in fragment.iter() {
                    element.push_attribute((key, value));
                }
                writer
                    .write_event(Event::Empty(element))
                    .map_err(|e| Error::IoError(format!("failed to write manifest: {e}")))?;
            }
            writer
                .write_event(Event::End(BytesEnd::new(MANIFEST_ROOT)))
                .map_err(|e| Error::IoError(format!("failed to write manifest: {e}")))?;
        }

        Ok(writer.into_inner())
    }

    /// The images listed by this manifest, in document order
    pub fn images(&self) -> &[ImageRecord] {
        &self.images
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ImageRecord> {
        self.images.iter()
    }
}

impl<'a> IntoIterator for &'a ImageManifest {
    type Item = &'a ImageRecord;
    type IntoIter = std::slice::Iter<'a, ImageRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.images.iter()
    }
}

/// Read one attribute's unescaped value, if present
fn attribute_value(element: &BytesStart<'_>, name: &str) -> Result<Option<String>> {
    for attr in element.attributes() {
        let attr =
            attr.map_err(|e| Error::ParseError(format!("bad attribute in manifest: {e}")))?;
        if attr.key.as_ref() == name.as_bytes() {
            let value = attr
                .unescape_value()
                .map_err(|e| Error::ParseError(format!("bad attribute value: {e}")))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

/// Materialize one image element into a record, validating the schema
fn parse_image_element(element: &BytesStart<'_>) -> Result<ImageRecord> {
    let mut metadata = Metadata::new();
    for attr in element.attributes() {
        let attr =
            attr.map_err(|e| Error::ParseError(format!("bad attribute in manifest: {e}")))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| Error::ParseError(format!("bad attribute value: {e}")))?
            .into_owned();
        metadata.insert(key, value);
    }

    for required in REQUIRED_ATTRS {
        if !metadata.contains_key(required) {
            return Err(Error::SchemaError(format!(
                "image entry is missing required attribute '{required}'"
            )));
        }
    }
    for attr in SIGNED_INT_ATTRS {
        let value = metadata.get(attr).unwrap_or_default();
        if value.parse::<i64>().is_err() {
            return Err(Error::SchemaError(format!(
                "image attribute '{attr}' is not an integer: '{value}'"
            )));
        }
    }
    for attr in UNSIGNED_INT_ATTRS {
        let value = metadata.get(attr).unwrap_or_default();
        if value.parse::<u64>().is_err() {
            return Err(Error::SchemaError(format!(
                "image attribute '{attr}' is not a non-negative integer: '{value}'"
            )));
        }
    }

    let checksum = metadata.get(attrs::CHECKSUM).unwrap_or_default().to_string();
    Ok(ImageRecord::from_manifest_entry(checksum, metadata))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CIRROS_MANIFEST: &str = r#"<pulp_image_manifest version="1">
        <image image_checksum="64d7c1cd2b6f60c92c14662941cb7913"
               image_container_format="bare"
               image_disk_format="qcow2"
               image_filename="cirros-0.3.2-x86_64-disk.img"
               image_min_disk="0"
               image_min_ram="0"
               image_name="cirros"
               image_size="13167616" />
    </pulp_image_manifest>"#;

    fn fragment(checksum: &str, name: &str, size: u64) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert(attrs::CHECKSUM, checksum);
        metadata.insert(attrs::CONTAINER_FORMAT, "bare");
        metadata.insert(attrs::DISK_FORMAT, "qcow2");
        metadata.insert(attrs::FILENAME, format!("{name}.img"));
        metadata.insert(attrs::MIN_DISK, "0");
        metadata.insert(attrs::MIN_RAM, "0");
        metadata.insert(attrs::NAME, name);
        metadata.insert(attrs::SIZE, size.to_string());
        metadata
    }

    #[test]
    fn test_parse_empty_manifest() {
        let manifest = ImageManifest::parse(br#"<pulp_image_manifest version="1" />"#).unwrap();
        assert_eq!(manifest.len(), 0);
        assert!(manifest.is_empty());
    }

    #[test]
    fn test_serialize_empty_manifest() {
        let bytes = ImageManifest::serialize(&[]).unwrap();
        assert_eq!(bytes, br#"<pulp_image_manifest version="1"/>"#);
    }

    #[test]
    fn test_parse_cirros_manifest() {
        let manifest = ImageManifest::parse(CIRROS_MANIFEST.as_bytes()).unwrap();
        assert_eq!(manifest.len(), 1);

        let image = &manifest.images()[0];
        assert_eq!(image.checksum(), "64d7c1cd2b6f60c92c14662941cb7913");
        assert_eq!(image.filename(), Some("cirros-0.3.2-x86_64-disk.img"));
        assert_eq!(image.size(), 13167616);
        assert_eq!(image.relative_path(), "64d7c1cd2b6f60c92c14662941cb7913");
    }

    #[test]
    fn test_round_trip_preserves_order_and_metadata() {
        let fragments = vec![
            fragment("aaa0000000000000000000000000000a", "alpha", 100),
            fragment("bbb0000000000000000000000000000b", "beta", 200),
            fragment("ccc0000000000000000000000000000c", "gamma", 300),
        ];

        let bytes = ImageManifest::serialize(&fragments).unwrap();
        let manifest = ImageManifest::parse(&bytes).unwrap();

        assert_eq!(manifest.len(), fragments.len());
        for (image, original) in manifest.iter().zip(&fragments) {
            assert_eq!(image.metadata(), original);
        }

        // Parsing the re-serialized output yields the same sequence
        let refragments: Vec<Metadata> =
            manifest.iter().map(|i| i.metadata().clone()).collect();
        let rebytes = ImageManifest::serialize(&refragments).unwrap();
        assert_eq!(bytes, rebytes);
    }

    #[test]
    fn test_parse_malformed_document() {
        let err = ImageManifest::parse(b"<pulp_image_manifest><image").unwrap_err();
        assert!(matches!(err, Error::ParseError(_)));

        let err = ImageManifest::parse(b"not xml at all").unwrap_err();
        assert!(matches!(err, Error::ParseError(_)));
    }

    #[test]
    fn test_parse_empty_input() {
        assert!(matches!(
            ImageManifest::parse(b""),
            Err(Error::ParseError(_))
        ));
    }

    #[test]
    fn test_parse_wrong_root_element() {
        let err = ImageManifest::parse(b"<something_else/>").unwrap_err();
        assert!(matches!(err, Error::SchemaError(_)));
    }

    #[test]
    fn test_missing_required_attribute_fails_whole_parse() {
        // Second image is valid, first is missing image_size: no partial result
        let doc = r#"<pulp_image_manifest version="1">
            <image image_checksum="aaa" image_container_format="bare"
                   image_disk_format="qcow2" image_filename="a.img"
                   image_min_disk="0" image_min_ram="0" image_name="a" />
            <image image_checksum="bbb" image_container_format="bare"
                   image_disk_format="qcow2" image_filename="b.img"
                   image_min_disk="0" image_min_ram="0" image_name="b"
                   image_size="10" />
        </pulp_image_manifest>"#;

        let err = ImageManifest::parse(doc.as_bytes()).unwrap_err();
        assert!(matches!(err, Error::SchemaError(_)));
    }

    #[test]
    fn test_non_integer_size_is_schema_error() {
        let doc = r#"<pulp_image_manifest version="1">
            <image image_checksum="aaa" image_container_format="bare"
                   image_disk_format="qcow2" image_filename="a.img"
                   image_min_disk="0" image_min_ram="0" image_name="a"
                   image_size="huge" />
        </pulp_image_manifest>"#;

        let err = ImageManifest::parse(doc.as_bytes()).unwrap_err();
        assert!(matches!(err, Error::SchemaError(_)));
    }

    #[test]
    fn test_extension_attributes_pass_through() {
        let doc = r#"<pulp_image_manifest version="1">
            <image image_checksum="aaa" image_container_format="bare"
                   image_disk_format="qcow2" image_filename="a.img"
                   image_min_disk="0" image_min_ram="0" image_name="a"
                   image_size="10" vendor_build_id="42" />
        </pulp_image_manifest>"#;

        let manifest = ImageManifest::parse(doc.as_bytes()).unwrap();
        assert_eq!(
            manifest.images()[0].metadata().get("vendor_build_id"),
            Some("42")
        );
    }
}

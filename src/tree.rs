use std::fs::File;
use std::io;

use indexmap::IndexMap;

use crate::types::{push, Key, Node};
use crate::upload::{FileInfo, UploadedFile, UploadedFileFactory};

/// The five parallel trees of one top-level upload field. Only `error` is
/// required; a missing tree reads as `None` at every leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileForest {
    pub name: Option<Node<Option<String>>>,
    pub media_type: Option<Node<Option<String>>>,
    pub tmp_name: Option<Node<Option<String>>>,
    pub error: Node<i64>,
    pub size: Option<Node<Option<i64>>>,
}

impl FileForest {
    /// Forest of a single, non-nested file.
    pub fn single(name: &str, media_type: &str, tmp_name: &str, error: i64, size: i64) -> Self {
        FileForest {
            name: Some(Node::Leaf(Some(name.to_owned()))),
            media_type: Some(Node::Leaf(Some(media_type.to_owned()))),
            tmp_name: Some(Node::Leaf(Some(tmp_name.to_owned()))),
            error: Node::Leaf(error),
            size: Some(Node::Leaf(Some(size))),
        }
    }
}

/// The five scalars describing one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeafAttributes<'a> {
    pub client_filename: Option<&'a str>,
    pub client_media_type: Option<&'a str>,
    pub tmp_name: Option<&'a str>,
    pub error: i64,
    pub size: Option<i64>,
}

struct Cursor<'a> {
    name: Option<&'a Node<Option<String>>>,
    media_type: Option<&'a Node<Option<String>>>,
    tmp_name: Option<&'a Node<Option<String>>>,
    size: Option<&'a Node<Option<i64>>>,
}

impl<'a> Cursor<'a> {
    fn child(&self, key: &Key) -> Cursor<'a> {
        Cursor {
            name: child(self.name, key),
            media_type: child(self.media_type, key),
            tmp_name: child(self.tmp_name, key),
            size: child(self.size, key),
        }
    }

    fn leaf(&self, error: i64) -> LeafAttributes<'a> {
        LeafAttributes {
            client_filename: text(self.name),
            client_media_type: text(self.media_type),
            tmp_name: text(self.tmp_name),
            error,
            size: self.size.and_then(Node::as_leaf).copied().flatten(),
        }
    }
}

fn child<'a, V>(node: Option<&'a Node<V>>, key: &Key) -> Option<&'a Node<V>> {
    node?.as_container()?.get(key)
}

fn text<'a>(node: Option<&'a Node<Option<String>>>) -> Option<&'a str> {
    node?.as_leaf()?.as_deref()
}

/// Walk one forest. The `error` tree drives the shape: a scalar there is a
/// leaf, a container is recursed key by key in its order. A `None` from the
/// transform drops that key; containers are kept even when left empty.
fn walk<R, E, F>(
    cursor: &Cursor<'_>,
    errors: &Node<i64>,
    leaf: &mut F,
) -> Result<Option<Node<R>>, E>
where
    F: FnMut(LeafAttributes<'_>) -> Result<Option<R>, E>,
{
    let entries = match errors {
        Node::Leaf(error) => return Ok(leaf(cursor.leaf(*error))?.map(Node::Leaf)),
        Node::Container(entries) => entries,
    };
    let mut out = IndexMap::new();
    for (key, error) in entries {
        let Some(result) = walk(&cursor.child(key), error, leaf)? else {
            continue;
        };
        match key {
            Key::Index(_) => {
                push(&mut out, result);
            }
            Key::Name(_) => {
                out.insert(key.clone(), result);
            }
        }
    }
    Ok(Some(Node::Container(out)))
}

/// Zip every top-level forest into one result tree. Tags whose walk yields
/// nothing are left out.
pub fn map_files<R, E, F>(
    files: &IndexMap<String, FileForest>,
    mut leaf: F,
) -> Result<IndexMap<String, Node<R>>, E>
where
    F: FnMut(LeafAttributes<'_>) -> Result<Option<R>, E>,
{
    let mut out = IndexMap::new();
    for (tag, forest) in files {
        let cursor = Cursor {
            name: forest.name.as_ref(),
            media_type: forest.media_type.as_ref(),
            tmp_name: forest.tmp_name.as_ref(),
            size: forest.size.as_ref(),
        };
        if let Some(result) = walk(&cursor, &forest.error, &mut leaf)? {
            out.insert(tag.clone(), result);
        }
    }
    Ok(out)
}

/// Turn an upload table into [`UploadedFile`]s. Leaves without a temp
/// location are skipped; the temp file is read through `factory`.
pub fn uploaded_files(
    files: &IndexMap<String, FileForest>,
    factory: &dyn UploadedFileFactory,
) -> io::Result<IndexMap<String, Node<UploadedFile>>> {
    map_files(files, |attrs| -> io::Result<Option<UploadedFile>> {
        let Some(tmp_name) = attrs.tmp_name else {
            return Ok(None);
        };
        let mut source = File::open(tmp_name)?;
        let info = FileInfo {
            error: attrs.error,
            client_filename: attrs.client_filename.map(str::to_owned),
            client_media_type: attrs.client_media_type.map(str::to_owned),
            size: attrs.size.and_then(|s| u64::try_from(s).ok()),
        };
        factory.create_uploaded_file(&mut source, info).map(Some)
    })
}

//! Conversion between OS buffers and scatter-gather descriptors

use std::borrow::Cow;

use ndis_rs::{NetBuffer, NetBufferList, SourceHandle};

use crate::error::{Error, Result};
use crate::pool::NblPool;
use crate::sg::SgBuf;

/// The fragments holding the used data space of `nb`, in order.
///
/// Zero-length fragments are skipped, the first fragment is cut at the data
/// offset, and the last one at the data length.
fn data_fragments(nb: &NetBuffer) -> impl Iterator<Item = &[u8]> + '_ {
    let mut skip = nb.data_offset();
    let mut remaining = nb.data_length();

    nb.mdl_chain().iter().filter_map(move |mdl| {
        let bytes = mdl.as_bytes();

        if remaining == 0 {
            return None;
        }
        if skip >= bytes.len() {
            // Also steps over zero-length fragments
            skip -= bytes.len();
            return None;
        }

        let bytes = &bytes[skip..];
        skip = 0;

        let used = bytes.len().min(remaining);
        remaining -= used;
        Some(&bytes[..used])
    })
}

/// Builds a descriptor viewing the used data space of `nb`.
///
/// The descriptor has exactly as many segments as there are non-empty
/// fragments covering the data.
///
/// ## Errors
///
/// - [`Error::Resources`] if the segment array couldn't be allocated
pub fn buffer_to_sg(nb: &NetBuffer) -> Result<SgBuf<'_>> {
    let mut sg = SgBuf::with_capacity(data_fragments(nb).count())?;
    fill(&mut sg, nb)?;
    Ok(sg)
}

/// Like [`buffer_to_sg`], but reuses `sg` when it has room for all of the
/// segments.
///
/// ## Errors
///
/// - [`Error::Resources`] if `sg` was too small and a replacement couldn't be
///   allocated
pub fn buffer_to_sg_into<'a>(sg: &mut SgBuf<'a>, nb: &'a NetBuffer) -> Result<()> {
    let needed = data_fragments(nb).count();

    if sg.capacity() >= needed {
        sg.clear();
    } else {
        *sg = SgBuf::with_capacity(needed)?;
    }

    fill(sg, nb)
}

fn fill<'a>(sg: &mut SgBuf<'a>, nb: &'a NetBuffer) -> Result<()> {
    for fragment in data_fragments(nb) {
        sg.push_segment(Cow::Borrowed(fragment))?;
    }

    debug_assert_eq!(sg.total_len(), nb.data_length());
    Ok(())
}

/// Copies `sg` into a new buffer list from `pool`, tagged as owned by `owner`.
///
/// With `align_to_word` the buffer is sized for an even length (the pad byte
/// is zeroed), while the used data length stays the true frame length.
///
/// ## Errors
///
/// - [`Error::Resources`] if the pool couldn't provide a buffer list
pub fn sg_to_buffer(
    sg: &SgBuf<'_>,
    pool: &NblPool,
    align_to_word: bool,
    owner: SourceHandle,
) -> Result<Box<NetBufferList>> {
    let len = sg.total_len();
    let padded_len = if align_to_word && len % 2 != 0 {
        len + 1
    } else {
        len
    };

    let mut nbl = pool.alloc(padded_len)?;

    if let Err(err) = copy_into(&mut nbl, sg, padded_len) {
        pool.free(nbl);
        return Err(err);
    }

    nbl.set_source_handle(Some(owner));
    Ok(nbl)
}

fn copy_into(nbl: &mut NetBufferList, sg: &SgBuf<'_>, padded_len: usize) -> Result<()> {
    let len = sg.total_len();
    let nb = nbl.nb_chain_mut().first_mut().ok_or(Error::Resources)?;
    let offset = nb.data_offset();

    let mdl = nb.first_mdl_mut().ok_or(Error::Resources)?;
    let dest = mdl
        .as_bytes_mut()
        .get_mut(offset..offset + padded_len)
        .ok_or(Error::Resources)?;

    let copied = sg.copy_to(&mut dest[..len]);
    debug_assert_eq!(copied, len);
    dest[len..].fill(0);

    nb.set_data_length(len).map_err(|_| Error::Resources)
}

//! Edit application: rewrite a text run in place, or white it out and draw
//! the replacement on top.

use std::ops::{Range, RangeInclusive};

use lopdf::{Dictionary, Document, Object};
use tracing::{debug, info, warn};

use crate::{
    config::{EditPolicy, EditStrategy, MatchPolicy},
    error::{EditError, EditResult},
    pdf::{
        content::{encode_string, ContentToken, Operand, Operator, StringFormat},
        coords::Rotation,
        extract::{self, string_advance, ItemRuns, PageContent, Spacing, REDRAW_TAG},
        fonts::{self, FontInfo, SimpleEncoding, StandardFont},
        loader,
        preprocess::{self, MatchPair},
        write::{self, ContentPart, PageUpdate},
    },
    types::AppliedStrategy,
    util::matrix::Matrix2D,
};

/// Which item to change and to what.
#[derive(Debug, Clone, Copy)]
pub struct EditTarget<'a> {
    pub page: u32,
    pub index: usize,
    /// What the caller saw; checked against the document, never trusted.
    pub expected_text: &'a str,
    pub replacement: &'a str,
}

#[derive(Debug)]
pub struct ApplyOutcome {
    pub bytes: Vec<u8>,
    pub strategy: AppliedStrategy,
    pub fallback_reason: Option<String>,
}

/// `apply(documentBytes, page, item, replacement)`. On error the input bytes
/// are untouched; the caller keeps using them.
pub fn apply(bytes: &[u8], target: &EditTarget<'_>, policy: &EditPolicy) -> EditResult<ApplyOutcome> {
    let document = loader::parse_document(bytes)?;
    let content = extract::extract_page(&document, target.page)?;
    let slot = content.item(target.index)?;
    let current = slot.visible().text.as_str();

    if preprocess::strip_ellipsis(target.expected_text) != current {
        warn!(
            page = target.page,
            item = target.index,
            expected = target.expected_text,
            found = current,
            "item text differs from the caller's copy; using the document's"
        );
    }
    if preprocess::strip_ellipsis(target.replacement) == current {
        debug!(page = target.page, item = target.index, "replacement equals current text");
        return Ok(ApplyOutcome {
            bytes: bytes.to_vec(),
            strategy: AppliedStrategy::Unchanged,
            fallback_reason: None,
        });
    }

    let (update, strategy, fallback_reason) =
        plan_update(&document, &content, slot, target, policy)?;

    let updated = write::incremental_update(bytes, &document, &[update])
        .map_err(|err| EditError::Write(format!("{err:#}")))?;
    loader::parse_document(&updated)
        .map_err(|err| EditError::Write(format!("output does not reload: {err}")))?;

    info!(
        page = target.page,
        item = target.index,
        strategy = ?strategy,
        "edit applied"
    );
    Ok(ApplyOutcome {
        bytes: updated,
        strategy,
        fallback_reason,
    })
}

fn plan_update(
    document: &Document,
    content: &PageContent,
    slot: ItemRuns<'_>,
    target: &EditTarget<'_>,
    policy: &EditPolicy,
) -> EditResult<(PageUpdate, AppliedStrategy, Option<String>)> {
    let redraw_with = |reason: Option<String>| -> EditResult<_> {
        let update = redraw(document, content, slot, target.replacement, policy)?;
        Ok((update, AppliedStrategy::Redrawn, reason))
    };

    // The visible text of a redrawn item is not in its original operator.
    if slot.is_redrawn() {
        return redraw_with(Some("item was already redrawn".into()));
    }

    match policy.strategy {
        EditStrategy::RedrawOnly => redraw_with(None),
        EditStrategy::SubstituteOnly => {
            let update = substitute(content, slot, target.replacement, policy.match_policy)?;
            Ok((update, AppliedStrategy::Substituted, None))
        }
        EditStrategy::SubstituteThenRedraw => {
            match substitute(content, slot, target.replacement, policy.match_policy) {
                Ok(update) => Ok((update, AppliedStrategy::Substituted, None)),
                Err(
                    err @ (EditError::AmbiguousMatch { .. }
                    | EditError::Encoding(_)
                    | EditError::SubstitutionInfeasible(_)),
                ) => {
                    warn!(
                        page = target.page,
                        item = target.index,
                        reason = %err,
                        "substitution infeasible, falling back to whiteout and redraw"
                    );
                    redraw_with(Some(err.to_string()))
                }
                Err(err) => Err(err),
            }
        }
    }
}

/// Rewrite the matched string operands of the run's own operator.
fn substitute(
    content: &PageContent,
    slot: ItemRuns<'_>,
    replacement: &str,
    match_policy: MatchPolicy,
) -> EditResult<PageUpdate> {
    let run = slot.original;
    if run.multibyte {
        return Err(EditError::Encoding(format!(
            "font {} uses two-byte codes",
            run.font_resource
        )));
    }
    let font = content
        .fonts
        .get(&run.font_resource)
        .cloned()
        .unwrap_or_else(|| FontInfo::fallback(&run.font_resource));

    let MatchPair {
        needle,
        replacement,
        narrowed,
    } = preprocess::prepare(&run.text, replacement);

    // Map every decoded character back to (string operand, code bytes).
    let mut decoded = String::new();
    let mut origins: Vec<(usize, Range<usize>)> = Vec::new();
    for (slot_index, string) in run.locator.strings.iter().enumerate() {
        for (code, bytes) in font.code_spans(&string.bytes) {
            for ch in font.code_text(code).chars() {
                decoded.push(ch);
                origins.push((slot_index, bytes.clone()));
            }
        }
    }

    let chars = find_occurrences(&decoded, &needle);
    let found = match (match_policy, chars.as_slice()) {
        (_, []) => None,
        (MatchPolicy::Unique, [only]) => Some(only.clone()),
        (MatchPolicy::Unique, _) => None,
        (MatchPolicy::First, [first, ..]) => Some(first.clone()),
    };
    let Some(range) = found else {
        return Err(EditError::AmbiguousMatch {
            needle,
            candidates: chars.len(),
        });
    };

    let result: String = decoded
        .chars()
        .take(range.start)
        .chain(replacement.chars())
        .chain(decoded.chars().skip(range.end))
        .collect();
    if result.trim().is_empty() {
        // A blank run is skipped by extraction, renumbering later items.
        return Err(EditError::SubstitutionInfeasible(
            "replacement leaves the text item blank".into(),
        ));
    }

    let encoded = font
        .encode(&replacement)
        .ok_or_else(|| EditError::Encoding(format!("{replacement:?} in font {}", font.base_font)))?;

    let (first_slot, first_bytes) = origins[range.start].clone();
    let (last_slot, last_bytes) = origins[range.end - 1].clone();
    let strings = &run.locator.strings;
    let mut rewritten = strings[first_slot].bytes[..first_bytes.start].to_vec();
    rewritten.extend_from_slice(&encoded);
    rewritten.extend_from_slice(&strings[last_slot].bytes[last_bytes.end..]);

    let stream_index = run.locator.stream_index;
    let stream = &content.streams[stream_index];
    let token_index = stream
        .tokens
        .iter()
        .position(|token| token.span == run.locator.operator_span)
        .ok_or_else(|| {
            EditError::Internal(anyhow::anyhow!("text operator not found in its stream"))
        })?;
    let token = &stream.tokens[token_index];

    let old_advance =
        operand_advance(&font, token, first_slot..=last_slot, run.font_size, run.spacing);
    let new_advance = string_advance(&font, &rewritten, run.font_size, run.spacing);
    let delta = new_advance - old_advance;

    // Spanning several TJ strings collapses them, and the kerning between
    // them, into the first one.
    let mut splices = vec![Splice {
        range: strings[first_slot].span.start..strings[last_slot].span.end,
        replacement: encode_string(&rewritten, strings[first_slot].format),
    }];
    let compensated =
        delta.abs() > ADVANCE_TOLERANCE && shares_pen(&stream.tokens[token_index + 1..]);
    if compensated {
        if run.font_size.abs() <= f64::EPSILON {
            return Err(EditError::SubstitutionInfeasible(
                "width change cannot be compensated at size zero".into(),
            ));
        }
        let kern = format_number(delta * 1000.0 / run.font_size);
        match token.operator {
            Operator::TjArray => {
                // Kern at the end of the array so the rest of the run keeps
                // its spacing relative to the new text.
                let close = stream.bytes[token.span.clone()]
                    .iter()
                    .rposition(|byte| *byte == b']')
                    .map(|offset| token.span.start + offset)
                    .ok_or_else(|| {
                        EditError::Internal(anyhow::anyhow!("TJ operand has no closing bracket"))
                    })?;
                splices.push(Splice {
                    range: close..close,
                    replacement: format!(" {kern}").into_bytes(),
                });
            }
            Operator::Tj => {
                let mut array = b"[".to_vec();
                array.extend_from_slice(&encode_string(&rewritten, strings[first_slot].format));
                array.extend_from_slice(format!(" {kern}] TJ").as_bytes());
                splices = vec![Splice {
                    range: token.span.clone(),
                    replacement: array,
                }];
            }
            _ => {
                return Err(EditError::SubstitutionInfeasible(format!(
                    "width change would shift the text that follows the {:?} operator",
                    token.operator
                )));
            }
        }
    }
    debug!(
        needle = needle.as_str(),
        narrowed,
        compensated,
        strings = last_slot - first_slot + 1,
        "substituting inside text operator"
    );

    let mut bytes = stream.bytes.clone();
    apply_splices(&mut bytes, splices);

    let mut update = PageUpdate::for_page(content.page_id);
    update.contents = Some(
        content
            .streams
            .iter()
            .enumerate()
            .map(|(index, stream)| {
                if index == stream_index {
                    ContentPart::New(bytes.clone())
                } else {
                    ContentPart::Existing(stream.object_id)
                }
            })
            .collect(),
    );
    Ok(update)
}

const ADVANCE_TOLERANCE: f64 = 1e-6;

/// Advance of the string operands in `slots`, with the TJ kerns between them.
fn operand_advance(
    font: &FontInfo,
    token: &ContentToken,
    slots: RangeInclusive<usize>,
    size: f64,
    spacing: Spacing,
) -> f64 {
    let mut advance = 0.0;
    let mut string_index = 0;
    let mut elements: Vec<&Operand> = Vec::new();
    for operand in &token.operands {
        match operand {
            Operand::Array(items) => elements.extend(items),
            other => elements.push(other),
        }
    }
    for element in elements {
        match element {
            Operand::String(string) => {
                if slots.contains(&string_index) {
                    advance += string_advance(font, &string.bytes, size, spacing);
                }
                string_index += 1;
            }
            Operand::Number(kern) if string_index > *slots.start() && string_index <= *slots.end() => {
                advance -= kern / 1000.0 * size;
            }
            _ => {}
        }
    }
    advance
}

/// Whether a later operator paints text from the pen position the current
/// one leaves behind.
fn shares_pen(rest: &[ContentToken]) -> bool {
    for token in rest {
        match token.operator {
            Operator::Tj | Operator::TjArray => return true,
            Operator::Bt
            | Operator::Et
            | Operator::Tm
            | Operator::Td
            | Operator::TdLeading
            | Operator::TStar
            | Operator::NextLineShow
            | Operator::NextLineShowSpaced => return false,
            _ => {}
        }
    }
    false
}

/// Char ranges of every non-overlapping occurrence of `needle`.
fn find_occurrences(haystack: &str, needle: &str) -> Vec<Range<usize>> {
    if needle.is_empty() {
        return Vec::new();
    }
    let needle_len = needle.chars().count();
    haystack
        .match_indices(needle)
        .map(|(byte_offset, _)| {
            let start = haystack[..byte_offset].chars().count();
            start..start + needle_len
        })
        .collect()
}

/// Wrap the original content in `q`/`Q` and append a whiteout plus the new
/// text inside a `/RetextRedraw` marked-content sequence.
fn redraw(
    document: &Document,
    content: &PageContent,
    slot: ItemRuns<'_>,
    replacement: &str,
    policy: &EditPolicy,
) -> EditResult<PageUpdate> {
    let original = slot.original;
    let cover = original
        .bbox()
        .union(slot.visible().bbox())
        .padded(policy.whiteout_margin);
    let standard = StandardFont::for_descriptor(&fonts::resolve(&original.base_font));

    let page = loader::page_dictionary(document, content.page_id)?;
    let mut resources = loader::page_resources(document, page);
    let mut font_dict = resources
        .get(b"Font")
        .ok()
        .and_then(|object| loader::resolve_dict(document, object).ok())
        .cloned()
        .unwrap_or_else(Dictionary::new);
    let font_name = fresh_font_name(&font_dict);
    font_dict.set(font_name.as_str(), Object::Dictionary(standard.resource()));
    resources.set("Font", Object::Dictionary(font_dict));

    let text = preprocess::strip_ellipsis(replacement);
    // Redraw fonts are declared WinAnsiEncoding.
    let encoding = SimpleEncoding::win_ansi();
    let mut unencodable = 0;
    let encoded: Vec<u8> = text
        .chars()
        .map(|ch| {
            encoding.encode(ch).unwrap_or_else(|| {
                unencodable += 1;
                b'?'
            })
        })
        .collect();
    if unencodable > 0 {
        warn!(
            page = content.page_number,
            item = slot.index,
            unencodable,
            "characters outside WinAnsiEncoding drawn as '?'"
        );
    }

    let [bg_r, bg_g, bg_b] = original.background.to_unit();
    let [fg_r, fg_g, fg_b] = original.color.normalize().to_unit();
    let (font_size, transform) = if original.font_size.abs() > f64::EPSILON {
        (original.font_size, original.transform)
    } else {
        (original.effective_size, normalized(original.transform))
    };

    let mut overlay = format!(
        "/{REDRAW_TAG} <</Item {index}>> BDC\nq\n{bg} rg\n{rect} re\nf\nBT\n/{font_name} {size} Tf\n{fg} rg\n{tm} Tm\n",
        index = slot.index,
        bg = join_numbers(&[bg_r, bg_g, bg_b]),
        rect = join_numbers(&[cover.min_x, cover.min_y, cover.width(), cover.height()]),
        size = format_number(font_size),
        fg = join_numbers(&[fg_r, fg_g, fg_b]),
        tm = join_numbers(&transform.to_array()),
    )
    .into_bytes();
    overlay.extend_from_slice(&encode_string(&encoded, StringFormat::Literal));
    overlay.extend_from_slice(b" Tj\nET\nQ\nEMC\n");

    let mut contents = Vec::with_capacity(content.streams.len() + 3);
    contents.push(ContentPart::New(b"q\n".to_vec()));
    contents.extend(
        content
            .streams
            .iter()
            .map(|stream| ContentPart::Existing(stream.object_id)),
    );
    contents.push(ContentPart::New(b"\nQ\n".to_vec()));
    contents.push(ContentPart::New(overlay));

    let mut update = PageUpdate::for_page(content.page_id);
    update.contents = Some(contents);
    update.resources = Some(resources);
    Ok(update)
}

fn fresh_font_name(fonts: &Dictionary) -> String {
    (1..)
        .map(|n| format!("RxF{n}"))
        .find(|name| !fonts.has(name.as_bytes()))
        .unwrap_or_else(|| "RxF".into())
}

/// Strip the scale out of a transform, for runs painted at size zero.
fn normalized(matrix: Matrix2D) -> Matrix2D {
    let sx = matrix.horizontal_scale();
    let sy = matrix.vertical_scale();
    if sx <= f64::EPSILON || sy <= f64::EPSILON {
        return matrix;
    }
    Matrix2D {
        a: matrix.a / sx,
        b: matrix.b / sx,
        c: matrix.c / sy,
        d: matrix.d / sy,
        ..matrix
    }
}

/// Add `rotation` to the `/Rotate` of each listed page.
pub fn rotate_pages(bytes: &[u8], rotations: &[(u32, Rotation)]) -> EditResult<Vec<u8>> {
    let document = loader::parse_document(bytes)?;
    let mut updates = Vec::new();
    for &(page, rotation) in rotations {
        if rotation == Rotation::None {
            continue;
        }
        let page_id = loader::page_id(&document, page)?;
        let dict = loader::page_dictionary(&document, page_id)?;
        let current = Rotation::from_degrees(loader::page_rotation(&document, dict))?;
        let mut update = PageUpdate::for_page(page_id);
        update.rotation = Some(current.compose(rotation).degrees());
        updates.push(update);
    }
    write::incremental_update(bytes, &document, &updates)
        .map_err(|err| EditError::Write(format!("{err:#}")))
}

struct Splice {
    range: Range<usize>,
    replacement: Vec<u8>,
}

fn apply_splices(bytes: &mut Vec<u8>, mut splices: Vec<Splice>) {
    splices.sort_by_key(|splice| splice.range.start);
    let mut shift: isize = 0;
    for splice in &splices {
        let start = (splice.range.start as isize + shift) as usize;
        let end = (splice.range.end as isize + shift) as usize;
        bytes.splice(start..end, splice.replacement.iter().copied());
        shift += splice.replacement.len() as isize - (end - start) as isize;
    }
}

fn join_numbers(values: &[f64]) -> String {
    values
        .iter()
        .map(|value| format_number(*value))
        .collect::<Vec<_>>()
        .join(" ")
}

fn format_number(value: f64) -> String {
    let mut text = if (value - value.round()).abs() < 1e-6 {
        format!("{:.0}", value.round())
    } else {
        format!("{:.6}", value)
    };
    while text.contains('.') && text.ends_with('0') {
        text.pop();
    }
    if text.ends_with('.') {
        text.pop();
    }
    if text == "-0" {
        text = "0".into();
    }
    text
}

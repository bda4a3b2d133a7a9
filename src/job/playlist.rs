//! Playlist selectors normalized into one canonical item selection.

use serde::Serialize;

/// One element of an explicit item list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ItemSpec {
    /// A single 1-based index.
    Single(u32),
    /// An inclusive index range.
    Range(u32, u32),
}

impl ItemSpec {
    fn len(self) -> u32 {
        match self {
            Self::Single(_) => 1,
            Self::Range(start, end) => end - start + 1,
        }
    }
}

/// Canonical playlist item selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub enum PlaylistSelection {
    /// Every entry.
    #[default]
    All,
    /// Entries `start..=end` (open-ended when `end` is `None`).
    Range {
        /// First index, 1-based.
        start: u32,
        /// Last index, inclusive.
        end: Option<u32>,
    },
    /// Explicit indices and ranges, in request order.
    Items(Vec<ItemSpec>),
}

impl PlaylistSelection {
    /// Normalizes the request's selectors.
    ///
    /// Explicit `items` win over `start`/`end`. `max_downloads` folds into the
    /// end bound of a range or truncates an explicit list.
    #[must_use]
    pub fn normalize(
        start: u32,
        end: Option<u32>,
        items: Option<&str>,
        max_downloads: Option<u32>,
    ) -> Self {
        if let Some(specs) = items.and_then(parse_items) {
            return Self::Items(truncate_items(specs, max_downloads));
        }

        let start = start.max(1);
        let capped_end = max_downloads.map(|max| start.saturating_add(max.saturating_sub(1)));
        let end = match (end, capped_end) {
            (Some(end), Some(cap)) => Some(end.min(cap)),
            (end, cap) => end.or(cap),
        };

        if start == 1 && end.is_none() {
            Self::All
        } else {
            Self::Range { start, end }
        }
    }

    /// Item-selection expression in `--playlist-items` syntax, `None` for all.
    #[must_use]
    pub fn to_expression(&self) -> Option<String> {
        match self {
            Self::All => None,
            Self::Range { start, end } => Some(match end {
                Some(end) => format!("{start}:{end}"),
                None => format!("{start}:"),
            }),
            Self::Items(specs) => Some(
                specs
                    .iter()
                    .map(|spec| match spec {
                        ItemSpec::Single(i) => i.to_string(),
                        ItemSpec::Range(a, b) => format!("{a}-{b}"),
                    })
                    .collect::<Vec<_>>()
                    .join(","),
            ),
        }
    }

    /// Upper bound on the number of selected entries, when known.
    #[must_use]
    pub fn max_entries(&self) -> Option<usize> {
        match self {
            Self::All | Self::Range { end: None, .. } => None,
            Self::Range {
                start,
                end: Some(end),
            } => Some((end - start + 1) as usize),
            Self::Items(specs) => Some(specs.iter().map(|s| s.len() as usize).sum()),
        }
    }
}

fn parse_items(items: &str) -> Option<Vec<ItemSpec>> {
    let specs = items
        .split(',')
        .map(|part| {
            let mut bounds = part.split('-').map(|n| n.trim().parse::<u32>().ok());
            match (bounds.next().flatten(), bounds.next()) {
                (Some(single), None) => Some(ItemSpec::Single(single)),
                (Some(start), Some(Some(end))) if start <= end => Some(ItemSpec::Range(start, end)),
                _ => None,
            }
        })
        .collect::<Option<Vec<_>>>()?;
    (!specs.is_empty()).then_some(specs)
}

fn truncate_items(specs: Vec<ItemSpec>, max_downloads: Option<u32>) -> Vec<ItemSpec> {
    let Some(mut remaining) = max_downloads else {
        return specs;
    };
    let mut out = Vec::new();
    for spec in specs {
        if remaining == 0 {
            break;
        }
        match spec {
            ItemSpec::Range(start, end) if spec.len() > remaining => {
                let end = (start + remaining - 1).min(end);
                out.push(if start == end {
                    ItemSpec::Single(start)
                } else {
                    ItemSpec::Range(start, end)
                });
                remaining = 0;
            }
            spec => {
                remaining -= spec.len();
                out.push(spec);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_select_all() {
        let selection = PlaylistSelection::normalize(1, None, None, None);
        assert_eq!(selection, PlaylistSelection::All);
        assert_eq!(selection.to_expression(), None);
    }

    #[test]
    fn test_items_take_precedence_over_range() {
        let selection = PlaylistSelection::normalize(2, Some(9), Some("1,3,5-7"), None);
        assert_eq!(selection.to_expression().as_deref(), Some("1,3,5-7"));
        assert_eq!(selection.max_entries(), Some(5));
    }

    #[test]
    fn test_max_downloads_folds_into_range_end() {
        let selection = PlaylistSelection::normalize(3, Some(20), None, Some(4));
        assert_eq!(selection, PlaylistSelection::Range { start: 3, end: Some(6) });
        assert_eq!(selection.to_expression().as_deref(), Some("3:6"));

        let open = PlaylistSelection::normalize(1, None, None, Some(2));
        assert_eq!(open.to_expression().as_deref(), Some("1:2"));

        let tighter_end = PlaylistSelection::normalize(1, Some(2), None, Some(10));
        assert_eq!(tighter_end.to_expression().as_deref(), Some("1:2"));
    }

    #[test]
    fn test_max_downloads_truncates_items() {
        let selection = PlaylistSelection::normalize(1, None, Some("2,10-20,30"), Some(3));
        assert_eq!(selection.to_expression().as_deref(), Some("2,10-11"));

        let single = PlaylistSelection::normalize(1, None, Some("4-8"), Some(1));
        assert_eq!(single.to_expression().as_deref(), Some("4"));
    }

    #[test]
    fn test_open_range_from_start() {
        let selection = PlaylistSelection::normalize(5, None, None, None);
        assert_eq!(selection.to_expression().as_deref(), Some("5:"));
        assert_eq!(selection.max_entries(), None);
    }
}

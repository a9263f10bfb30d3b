use std::{collections::HashMap, collections::HashSet, io::Write};

use crate::location::Slot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Loading,
    Error,
    Data,
}
impl Region {
    pub const ALL: [Region; 3] = [Region::Loading, Region::Error, Region::Data];

    /// Elements toggled together when the region is shown or hidden.
    pub fn elements(&self) -> &'static [&'static str] {
        match self {
            Region::Loading => &["loading"],
            Region::Error => &["error"],
            Region::Data => &["location-data", "bottom-hr", "refresh-section"],
        }
    }
}

/// The display surface the fetcher drives.
pub trait View {
    fn set_visible(&mut self, element: &str, visible: bool);
    /// Returns false when the layout has no such slot, which is not an error.
    fn set_text(&mut self, slot: Slot, value: &str) -> bool;
}

/// Renders to a terminal. Text slots are collected while the data region is
/// hidden and printed once it becomes visible.
pub struct TerminalView<W: Write> {
    out: W,
    layout: Vec<Slot>,
    json: bool,
    refresh_hint: bool,
    texts: HashMap<Slot, String>,
    visible: HashSet<String>,
}
impl<W: Write> TerminalView<W> {
    pub fn new(out: W, layout: Vec<Slot>, json: bool, refresh_hint: bool) -> Self {
        Self {
            out,
            layout,
            json,
            refresh_hint,
            texts: HashMap::new(),
            visible: HashSet::new(),
        }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }

    fn render(&mut self, element: &str) -> std::io::Result<()> {
        match element {
            "loading" if !self.json => writeln!(self.out, "Looking up your location..."),
            "error" if !self.json => writeln!(
                self.out,
                "Unable to retrieve location information. Please try again later."
            ),
            "error" => writeln!(self.out, "{}", serde_json::json!({ "error": true })),
            "location-data" if self.json => {
                let map: serde_json::Map<String, serde_json::Value> = self
                    .layout
                    .iter()
                    .filter_map(|slot| {
                        self.texts
                            .get(slot)
                            .map(|v| (slot.id().to_string(), serde_json::Value::String(v.clone())))
                    })
                    .collect();
                writeln!(self.out, "{}", serde_json::Value::Object(map))
            }
            "location-data" => {
                for slot in &self.layout {
                    if let Some(value) = self.texts.get(slot) {
                        writeln!(self.out, "{:12} {}", slot.label(), value)?;
                    }
                }
                Ok(())
            }
            "bottom-hr" if !self.json => writeln!(self.out, "{}", "-".repeat(40)),
            "refresh-section" if self.refresh_hint && !self.json => {
                writeln!(self.out, "Press Enter to refresh, Ctrl-D to quit")
            }
            _ => Ok(()),
        }?;
        self.out.flush()
    }
}
impl<W: Write> View for TerminalView<W> {
    fn set_visible(&mut self, element: &str, visible: bool) {
        if !visible {
            self.visible.remove(element);
            return;
        }
        if self.visible.insert(element.to_string()) {
            // a closed stdout leaves nobody to tell
            let _ = self.render(element);
        }
    }

    fn set_text(&mut self, slot: Slot, value: &str) -> bool {
        if !self.layout.contains(&slot) {
            return false;
        }
        self.texts.insert(slot, value.to_string());
        true
    }
}

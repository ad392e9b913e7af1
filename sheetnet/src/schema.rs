//! Schematic Document Model
//!
//! In-memory structures handed over by the document collaborator: pages of
//! drawn items, sheet symbols that place child pages, and the root page.
//! All coordinates are integer internal units so that connection tests are
//! exact equality checks rather than tolerance comparisons.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::core::SheetNetError;

/// A drawing coordinate in internal units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Point {
    pub x: i64,
    pub y: i64,
}

impl Point {
    pub const fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }

    /// True when `self` lies strictly between `start` and `end` on the segment.
    pub fn is_inside_segment(&self, start: Point, end: Point) -> bool {
        if *self == start || *self == end {
            return false;
        }
        let cross = (end.x - start.x) as i128 * (self.y - start.y) as i128
            - (end.y - start.y) as i128 * (self.x - start.x) as i128;
        if cross != 0 {
            return false;
        }
        let within_x = self.x >= start.x.min(end.x) && self.x <= start.x.max(end.x);
        let within_y = self.y >= start.y.min(end.y) && self.y <= start.y.max(end.y);
        within_x && within_y
    }
}

impl From<(i64, i64)> for Point {
    fn from((x, y): (i64, i64)) -> Self {
        Self { x, y }
    }
}

/// Document-wide identity of a drawn item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub u32);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identity of a drawing page (may be placed by several sheet symbols)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageId(pub String);

impl From<&str> for PageId {
    fn from(s: &str) -> Self {
        PageId(s.to_string())
    }
}

/// Identity of a sheet symbol placed on a parent page
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SheetId(pub String);

impl From<&str> for SheetId {
    fn from(s: &str) -> Self {
        SheetId(s.to_string())
    }
}

/// One step of a sheet path
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SheetSegment {
    pub id: SheetId,
    pub name: String,
}

/// Chain of sheet instances from the root sheet down to one placement.
///
/// Displayed as `/` for the root and `/Power/Regulator/` below it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct SheetPath {
    segments: Vec<SheetSegment>,
}

impl SheetPath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn child(&self, id: SheetId, name: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(SheetSegment {
            id,
            name: name.into(),
        });
        Self { segments }
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// Qualify a sheet-local name with this path (`/Sub/OUT`).
    pub fn qualify(&self, name: &str) -> String {
        format!("{}{}", self, name)
    }
}

impl fmt::Display for SheetPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/")?;
        for segment in &self.segments {
            write!(f, "{}/", segment.name)?;
        }
        Ok(())
    }
}

/// Electrical shape of a sheet pin or hierarchical label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PinShape {
    Input,
    Output,
    #[default]
    Bidirectional,
    TriState,
    Passive,
}

/// Scope of a power symbol's net
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerScope {
    Global,
    Local,
}

/// Power role carried by the (usually hidden) pin of a power symbol
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PowerPin {
    pub scope: PowerScope,
    pub net: String,
}

/// Which wiring layer an item connects on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layer {
    Net,
    Bus,
    Either,
}

/// The fixed set of connectable item kinds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemKind {
    Wire {
        start: Point,
        end: Point,
    },
    BusWire {
        start: Point,
        end: Point,
    },
    Junction {
        at: Point,
    },
    NoConnect {
        at: Point,
    },
    /// Diagonal stub joining a scalar wire (`wire_end`) to a bus (`bus_end`)
    BusEntry {
        bus_end: Point,
        wire_end: Point,
    },
    LocalLabel {
        at: Point,
        text: String,
    },
    GlobalLabel {
        at: Point,
        text: String,
    },
    HierLabel {
        at: Point,
        text: String,
        #[serde(default)]
        shape: PinShape,
    },
    SheetPin {
        at: Point,
        text: String,
        #[serde(default)]
        shape: PinShape,
        sheet: SheetId,
    },
    /// Net-class style directive; connects but never names a net
    DirectiveLabel {
        at: Point,
        text: String,
    },
    SymbolPin {
        at: Point,
        reference: String,
        number: String,
        #[serde(default)]
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        power: Option<PowerPin>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    #[serde(flatten)]
    pub kind: ItemKind,
}

impl Item {
    pub fn new(id: u32, kind: ItemKind) -> Self {
        Self {
            id: ItemId(id),
            kind,
        }
    }

    pub fn wire(id: u32, start: (i64, i64), end: (i64, i64)) -> Self {
        Self::new(
            id,
            ItemKind::Wire {
                start: start.into(),
                end: end.into(),
            },
        )
    }

    pub fn bus(id: u32, start: (i64, i64), end: (i64, i64)) -> Self {
        Self::new(
            id,
            ItemKind::BusWire {
                start: start.into(),
                end: end.into(),
            },
        )
    }

    pub fn junction(id: u32, at: (i64, i64)) -> Self {
        Self::new(id, ItemKind::Junction { at: at.into() })
    }

    pub fn no_connect(id: u32, at: (i64, i64)) -> Self {
        Self::new(id, ItemKind::NoConnect { at: at.into() })
    }

    pub fn bus_entry(id: u32, bus_end: (i64, i64), wire_end: (i64, i64)) -> Self {
        Self::new(
            id,
            ItemKind::BusEntry {
                bus_end: bus_end.into(),
                wire_end: wire_end.into(),
            },
        )
    }

    pub fn local_label(id: u32, at: (i64, i64), text: &str) -> Self {
        Self::new(
            id,
            ItemKind::LocalLabel {
                at: at.into(),
                text: text.to_string(),
            },
        )
    }

    pub fn global_label(id: u32, at: (i64, i64), text: &str) -> Self {
        Self::new(
            id,
            ItemKind::GlobalLabel {
                at: at.into(),
                text: text.to_string(),
            },
        )
    }

    pub fn hier_label(id: u32, at: (i64, i64), text: &str, shape: PinShape) -> Self {
        Self::new(
            id,
            ItemKind::HierLabel {
                at: at.into(),
                text: text.to_string(),
                shape,
            },
        )
    }

    pub fn sheet_pin(id: u32, at: (i64, i64), text: &str, shape: PinShape, sheet: &str) -> Self {
        Self::new(
            id,
            ItemKind::SheetPin {
                at: at.into(),
                text: text.to_string(),
                shape,
                sheet: SheetId(sheet.to_string()),
            },
        )
    }

    pub fn directive(id: u32, at: (i64, i64), text: &str) -> Self {
        Self::new(
            id,
            ItemKind::DirectiveLabel {
                at: at.into(),
                text: text.to_string(),
            },
        )
    }

    pub fn pin(id: u32, at: (i64, i64), reference: &str, number: &str) -> Self {
        Self::new(
            id,
            ItemKind::SymbolPin {
                at: at.into(),
                reference: reference.to_string(),
                number: number.to_string(),
                name: String::new(),
                power: None,
            },
        )
    }

    pub fn power_pin(id: u32, at: (i64, i64), reference: &str, net: &str, scope: PowerScope) -> Self {
        Self::new(
            id,
            ItemKind::SymbolPin {
                at: at.into(),
                reference: reference.to_string(),
                number: "1".to_string(),
                name: net.to_string(),
                power: Some(PowerPin {
                    scope,
                    net: net.to_string(),
                }),
            },
        )
    }

    /// Points where this item joins others by coordinate equality.
    ///
    /// A bus entry only reports its wire end here; its bus end is a tap, see
    /// [`Item::bus_tap`].
    pub fn connection_points(&self) -> Vec<Point> {
        match &self.kind {
            ItemKind::Wire { start, end } | ItemKind::BusWire { start, end } => {
                if start == end {
                    vec![*start]
                } else {
                    vec![*start, *end]
                }
            }
            ItemKind::BusEntry { wire_end, .. } => vec![*wire_end],
            ItemKind::Junction { at }
            | ItemKind::NoConnect { at }
            | ItemKind::LocalLabel { at, .. }
            | ItemKind::GlobalLabel { at, .. }
            | ItemKind::HierLabel { at, .. }
            | ItemKind::SheetPin { at, .. }
            | ItemKind::DirectiveLabel { at, .. }
            | ItemKind::SymbolPin { at, .. } => vec![*at],
        }
    }

    /// Segment geometry for wires and bus wires.
    pub fn segment(&self) -> Option<(Point, Point)> {
        match &self.kind {
            ItemKind::Wire { start, end } | ItemKind::BusWire { start, end } => Some((*start, *end)),
            _ => None,
        }
    }

    pub fn bus_tap(&self) -> Option<Point> {
        match &self.kind {
            ItemKind::BusEntry { bus_end, .. } => Some(*bus_end),
            _ => None,
        }
    }

    pub fn layer(&self) -> Layer {
        match &self.kind {
            ItemKind::Wire { .. } | ItemKind::BusEntry { .. } | ItemKind::SymbolPin { .. } => Layer::Net,
            ItemKind::BusWire { .. } => Layer::Bus,
            ItemKind::Junction { .. }
            | ItemKind::NoConnect { .. }
            | ItemKind::LocalLabel { .. }
            | ItemKind::GlobalLabel { .. }
            | ItemKind::HierLabel { .. }
            | ItemKind::SheetPin { .. }
            | ItemKind::DirectiveLabel { .. } => Layer::Either,
        }
    }

    pub fn is_bus_wire(&self) -> bool {
        matches!(self.kind, ItemKind::BusWire { .. })
    }

    pub fn is_no_connect(&self) -> bool {
        matches!(self.kind, ItemKind::NoConnect { .. })
    }

    /// Text of label-like items.
    pub fn text(&self) -> Option<&str> {
        match &self.kind {
            ItemKind::LocalLabel { text, .. }
            | ItemKind::GlobalLabel { text, .. }
            | ItemKind::HierLabel { text, .. }
            | ItemKind::SheetPin { text, .. }
            | ItemKind::DirectiveLabel { text, .. } => Some(text),
            _ => None,
        }
    }

    /// Representative location used in advisories.
    pub fn anchor(&self) -> Point {
        match &self.kind {
            ItemKind::Wire { start, .. } | ItemKind::BusWire { start, .. } => *start,
            ItemKind::BusEntry { bus_end, .. } => *bus_end,
            ItemKind::Junction { at }
            | ItemKind::NoConnect { at }
            | ItemKind::LocalLabel { at, .. }
            | ItemKind::GlobalLabel { at, .. }
            | ItemKind::HierLabel { at, .. }
            | ItemKind::SheetPin { at, .. }
            | ItemKind::DirectiveLabel { at, .. }
            | ItemKind::SymbolPin { at, .. } => *at,
        }
    }
}

/// A sheet symbol placing `page` as a child of the page it is drawn on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetSymbol {
    pub id: SheetId,
    pub name: String,
    pub page: PageId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub id: PageId,
    #[serde(default)]
    pub items: Vec<Item>,
    #[serde(default)]
    pub sheets: Vec<SheetSymbol>,
}

impl Page {
    pub fn new(id: &str) -> Self {
        Self {
            id: PageId(id.to_string()),
            items: Vec::new(),
            sheets: Vec::new(),
        }
    }

    pub fn with_items(mut self, items: impl IntoIterator<Item = Item>) -> Self {
        self.items.extend(items);
        self
    }

    pub fn with_sheet(mut self, id: &str, name: &str, page: &str) -> Self {
        self.sheets.push(SheetSymbol {
            id: SheetId(id.to_string()),
            name: name.to_string(),
            page: PageId(page.to_string()),
        });
        self
    }

    pub fn item(&self, id: ItemId) -> Option<&Item> {
        self.items.iter().find(|i| i.id == id)
    }

    pub fn sheet(&self, id: &SheetId) -> Option<&SheetSymbol> {
        self.sheets.iter().find(|s| &s.id == id)
    }
}

/// A loaded multi-sheet document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schematic {
    pub root: PageId,
    pub pages: Vec<Page>,
}

impl Schematic {
    pub fn new(root: Page) -> Self {
        Self {
            root: root.id.clone(),
            pages: vec![root],
        }
    }

    pub fn with_page(mut self, page: Page) -> Self {
        self.pages.push(page);
        self
    }

    pub fn page(&self, id: &PageId) -> Option<&Page> {
        self.pages.iter().find(|p| &p.id == id)
    }

    pub fn page_mut(&mut self, id: &PageId) -> Option<&mut Page> {
        self.pages.iter_mut().find(|p| &p.id == id)
    }

    /// Page an item is drawn on.
    pub fn find_item(&self, id: ItemId) -> Option<(&Page, &Item)> {
        self.pages
            .iter()
            .find_map(|p| p.item(id).map(|item| (p, item)))
    }

    pub fn from_json_str(content: &str) -> Result<Self, SheetNetError> {
        let schematic: Schematic = serde_json::from_str(content)?;
        if schematic.page(&schematic.root).is_none() {
            return Err(SheetNetError::InvalidDocument(format!(
                "root page '{}' is not defined",
                schematic.root.0
            )));
        }
        Ok(schematic)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, SheetNetError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_inside_segment() {
        let a = Point::new(0, 0);
        let b = Point::new(10, 0);
        assert!(Point::new(5, 0).is_inside_segment(a, b));
        assert!(!Point::new(0, 0).is_inside_segment(a, b));
        assert!(!Point::new(10, 0).is_inside_segment(a, b));
        assert!(!Point::new(5, 1).is_inside_segment(a, b));
        assert!(!Point::new(11, 0).is_inside_segment(a, b));
        assert!(Point::new(2, 2).is_inside_segment(a, Point::new(4, 4)));
    }

    #[test]
    fn test_sheet_path_display() {
        let root = SheetPath::root();
        assert_eq!(root.to_string(), "/");
        let sub = root.child("s1".into(), "Power");
        let deeper = sub.child("s2".into(), "Reg");
        assert_eq!(deeper.to_string(), "/Power/Reg/");
        assert_eq!(deeper.depth(), 2);
        assert_eq!(sub.qualify("OUT"), "/Power/OUT");
        assert_eq!(root.qualify("OUT"), "/OUT");
    }

    #[test]
    fn test_bus_entry_points() {
        let entry = Item::bus_entry(1, (0, 0), (5, 5));
        assert_eq!(entry.connection_points(), vec![Point::new(5, 5)]);
        assert_eq!(entry.bus_tap(), Some(Point::new(0, 0)));
    }

    #[test]
    fn test_json_roundtrip_of_item_kinds() {
        let json = r#"{
            "root": "top",
            "pages": [
                { "id": "top",
                  "items": [
                    { "id": 1, "kind": "wire", "start": {"x": 0, "y": 0}, "end": {"x": 10, "y": 0} },
                    { "id": 2, "kind": "global_label", "at": {"x": 0, "y": 0}, "text": "VCC" },
                    { "id": 3, "kind": "sheet_pin", "at": {"x": 10, "y": 0}, "text": "IN", "shape": "input", "sheet": "s1" }
                  ],
                  "sheets": [ { "id": "s1", "name": "Sub", "page": "sub" } ] },
                { "id": "sub" }
            ]
        }"#;
        let schematic = Schematic::from_json_str(json).unwrap();
        assert_eq!(schematic.pages.len(), 2);
        let (page, item) = schematic.find_item(ItemId(3)).unwrap();
        assert_eq!(page.id, PageId::from("top"));
        assert_eq!(item.text(), Some("IN"));
    }

    #[test]
    fn test_missing_root_page_rejected() {
        let json = r#"{ "root": "nope", "pages": [] }"#;
        assert!(matches!(
            Schematic::from_json_str(json),
            Err(SheetNetError::InvalidDocument(_))
        ));
    }
}

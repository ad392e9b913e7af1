//! Sheet hierarchy walker.
//!
//! Expands the document's sheet symbols into concrete sheet instances and
//! collects the sheet-pin / hierarchical-label pairs that link a parent
//! instance to each child instance.

use std::collections::HashMap;

use crate::advisory::{Advisory, AdvisoryKind};
use crate::schema::{ItemId, ItemKind, PageId, Schematic, SheetPath};

/// Deepest nesting followed before the walk gives up on a branch
pub const MAX_DEPTH: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetInstance {
    pub path: SheetPath,
    pub page: PageId,
}

/// A sheet pin on `parent` that exposes the hierarchical label `name` of `child`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HierarchyLink {
    pub parent: SheetPath,
    pub pin: ItemId,
    pub child: SheetPath,
    pub name: String,
}

#[derive(Debug, Clone, Default)]
pub struct Hierarchy {
    /// Instances in depth-first order, root first
    pub instances: Vec<SheetInstance>,
    pub links: Vec<HierarchyLink>,
    pub advisories: Vec<Advisory>,
}

impl Hierarchy {
    pub fn walk(schematic: &Schematic) -> Self {
        let mut hierarchy = Hierarchy::default();
        if schematic.page(&schematic.root).is_none() {
            tracing::debug!("root page '{}' missing, empty hierarchy", schematic.root.0);
            return hierarchy;
        }
        let mut chain = vec![schematic.root.clone()];
        hierarchy.visit(schematic, &schematic.root, SheetPath::root(), &mut chain);
        hierarchy
    }

    fn visit(&mut self, schematic: &Schematic, page_id: &PageId, path: SheetPath, chain: &mut Vec<PageId>) {
        let Some(page) = schematic.page(page_id) else {
            return;
        };
        self.instances.push(SheetInstance {
            path: path.clone(),
            page: page_id.clone(),
        });

        for symbol in &page.sheets {
            if chain.contains(&symbol.page) || path.depth() + 1 > MAX_DEPTH {
                self.advisories.push(Advisory::new(
                    AdvisoryKind::SheetRecursion,
                    &path,
                    format!("sheet '{}' places page '{}' inside itself", symbol.name, symbol.page.0),
                ));
                continue;
            }
            if schematic.page(&symbol.page).is_none() {
                tracing::debug!("sheet '{}' references missing page '{}', pruned", symbol.name, symbol.page.0);
                continue;
            }

            let child = path.child(symbol.id.clone(), symbol.name.clone());
            for item in &page.items {
                if let ItemKind::SheetPin { text, sheet, .. } = &item.kind {
                    if sheet == &symbol.id {
                        self.links.push(HierarchyLink {
                            parent: path.clone(),
                            pin: item.id,
                            child: child.clone(),
                            name: text.clone(),
                        });
                    }
                }
            }

            chain.push(symbol.page.clone());
            self.visit(schematic, &symbol.page, child, chain);
            chain.pop();
        }
    }

    pub fn instance(&self, path: &SheetPath) -> Option<&SheetInstance> {
        self.instances.iter().find(|i| &i.path == path)
    }

    pub fn instances_of<'a>(&'a self, page: &'a PageId) -> impl Iterator<Item = &'a SheetInstance> + 'a {
        self.instances.iter().filter(move |i| &i.page == page)
    }

    /// Page placed at each instance path.
    pub fn pages(&self) -> HashMap<SheetPath, PageId> {
        self.instances
            .iter()
            .map(|i| (i.path.clone(), i.page.clone()))
            .collect()
    }
}

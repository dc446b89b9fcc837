//! Declarative stage tree construction.

use crate::core::StagePath;
use crate::stage::{Stage, StageConfig};
use std::fmt;

type ConfigureFn = Box<dyn Fn(&StagePath) -> StageConfig + Send + Sync>;

/// Builds a path-addressed stage tree without executing anything.
///
/// Each `add` call appends a child builder under the next 1-based sibling
/// position, in call order, so path assignment is deterministic. A builder
/// whose [`configure`](Self::configure) was never invoked contributes no
/// stage and none of its declared descendants, while still consuming its
/// sibling position; that is the mechanism for conditionally absent
/// branches.
#[derive(Default)]
pub struct StageBuilder {
    configure: Option<ConfigureFn>,
    children: Vec<StageBuilder>,
}

impl StageBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Supplies the factory that produces this node's configuration.
    ///
    /// The factory receives the path the node ends up at, which is only
    /// known once the whole tree is assembled.
    pub fn configure<F>(&mut self, factory: F) -> &mut Self
    where
        F: Fn(&StagePath) -> StageConfig + Send + Sync + 'static,
    {
        self.configure = Some(Box::new(factory));
        self
    }

    /// Appends a child builder and hands it to `configurator` immediately,
    /// so nested declarations compose left to right, depth first.
    pub fn add<F>(&mut self, configurator: F) -> &mut Self
    where
        F: FnOnce(&mut StageBuilder),
    {
        let mut child = StageBuilder::new();
        configurator(&mut child);
        self.children.push(child);
        self
    }

    /// Calls [`add`](Self::add) once per item, preserving iteration order as
    /// sibling order.
    pub fn add_for_each<I, F>(&mut self, items: I, mut configurator: F) -> &mut Self
    where
        I: IntoIterator,
        F: FnMut(&mut StageBuilder, I::Item),
    {
        for item in items {
            let mut child = StageBuilder::new();
            configurator(&mut child, item);
            self.children.push(child);
        }
        self
    }

    /// Returns true once a configuration factory was supplied.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.configure.is_some()
    }

    /// Returns the number of declared children.
    #[must_use]
    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    /// Materializes this node and every declared descendant, rooted at
    /// `path`, in path order. Yields nothing if the node is unconfigured.
    #[must_use]
    pub fn build(&self, path: StagePath) -> Vec<(StagePath, Stage)> {
        let Some(configure) = &self.configure else {
            return Vec::new();
        };
        let config = configure(&path);
        let mut stages = vec![(path.clone(), Stage::new(path.clone(), config))];
        stages.extend(self.build_children(&path, 1));
        stages
    }

    /// Materializes only the declared children, assigning sibling positions
    /// starting at `start_index`. Used when a stage fans out dynamically
    /// under a parent that already exists.
    pub(crate) fn build_children(
        &self,
        parent: &StagePath,
        start_index: u32,
    ) -> Vec<(StagePath, Stage)> {
        let mut stages = Vec::new();
        let mut index = start_index;
        for child in &self.children {
            stages.extend(child.build(parent.append(index)));
            index += 1;
        }
        stages
    }
}

impl fmt::Debug for StageBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageBuilder")
            .field("configured", &self.is_configured())
            .field("children", &self.children)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(name: &str) -> impl Fn(&StagePath) -> StageConfig + Send + Sync + 'static {
        let name = name.to_string();
        move |_path| StageConfig::new(name.clone())
    }

    fn paths_of(stages: &[(StagePath, Stage)]) -> Vec<String> {
        stages.iter().map(|(p, _)| p.to_string()).collect()
    }

    #[test]
    fn test_unconfigured_builder_builds_nothing() {
        let builder = StageBuilder::new();
        assert!(builder.build(StagePath::root()).is_empty());
    }

    #[test]
    fn test_single_stage() {
        let mut builder = StageBuilder::new();
        builder.configure(named("root"));

        let stages = builder.build(StagePath::root());
        assert_eq!(paths_of(&stages), vec!["1"]);
        assert_eq!(stages[0].1.name(), "root");
    }

    #[test]
    fn test_children_get_sequential_positions() {
        let mut builder = StageBuilder::new();
        builder.configure(named("root"));
        builder.add(|child| {
            child.configure(named("first"));
        });
        builder.add(|child| {
            child.configure(named("second"));
        });
        builder.add(|child| {
            child.configure(named("third"));
        });

        let stages = builder.build(StagePath::root());
        assert_eq!(paths_of(&stages), vec!["1", "1-1", "1-2", "1-3"]);
    }

    #[test]
    fn test_nested_declarations_compose_depth_first() {
        let mut builder = StageBuilder::new();
        builder.configure(named("root"));
        builder.add(|child| {
            child.configure(named("left"));
            child.add(|grandchild| {
                grandchild.configure(named("left-leaf"));
            });
        });
        builder.add(|child| {
            child.configure(named("right"));
        });

        let stages = builder.build(StagePath::root());
        assert_eq!(paths_of(&stages), vec!["1", "1-1", "1-1-1", "1-2"]);
        assert_eq!(stages[2].1.name(), "left-leaf");
    }

    #[test]
    fn test_unconfigured_child_is_absent_but_keeps_position() {
        let mut builder = StageBuilder::new();
        builder.configure(named("root"));
        builder.add(|child| {
            child.configure(named("first"));
        });
        builder.add(|child| {
            // Declared but never configured; the whole branch is absent.
            child.add(|grandchild| {
                grandchild.configure(named("orphan"));
            });
        });
        builder.add(|child| {
            child.configure(named("third"));
        });

        let stages = builder.build(StagePath::root());
        assert_eq!(paths_of(&stages), vec!["1", "1-1", "1-3"]);
    }

    #[test]
    fn test_add_for_each_preserves_order() {
        let mut builder = StageBuilder::new();
        builder.configure(named("root"));
        builder.add_for_each(["alpha", "beta", "gamma"], |child, name| {
            child.configure(named(name));
        });

        let stages = builder.build(StagePath::root());
        assert_eq!(paths_of(&stages), vec!["1", "1-1", "1-2", "1-3"]);
        assert_eq!(stages[1].1.name(), "alpha");
        assert_eq!(stages[3].1.name(), "gamma");
    }

    #[test]
    fn test_configure_factory_receives_assigned_path() {
        let mut builder = StageBuilder::new();
        builder.configure(|path| StageConfig::new(format!("stage {path}")));
        builder.add(|child| {
            child.configure(|path| StageConfig::new(format!("stage {path}")));
        });

        let stages = builder.build(StagePath::root());
        assert_eq!(stages[0].1.name(), "stage 1");
        assert_eq!(stages[1].1.name(), "stage 1-1");
    }

    #[test]
    fn test_build_is_deterministic() {
        let assemble = || {
            let mut builder = StageBuilder::new();
            builder.configure(named("root"));
            builder.add(|c| {
                c.configure(named("a"));
            });
            builder.add(|c| {
                c.configure(named("b"));
            });
            builder
        };

        let first = paths_of(&assemble().build(StagePath::root()));
        let second = paths_of(&assemble().build(StagePath::root()));
        assert_eq!(first, second);
    }

    #[test]
    fn test_build_children_with_offset() {
        let mut builder = StageBuilder::new();
        builder.add(|c| {
            c.configure(named("dynamic-a"));
        });
        builder.add(|c| {
            c.configure(named("dynamic-b"));
        });

        let parent = StagePath::parse("1-2").unwrap();
        let stages = builder.build_children(&parent, 3);
        assert_eq!(paths_of(&stages), vec!["1-2-3", "1-2-4"]);
    }
}

//! Passes that rewrite the collected tree before it is executed.
//!
//! Passes run in a fixed order, each over the whole tree:
//! prepare options, only-slow, skip-slow, mark skipped, only resolution and
//! pruning of blocks without tests.

use futures::{FutureExt, future::BoxFuture};

use crate::{
    config::Config,
    hook::{Hook, HookKind},
    options::{self, OptionError},
    tree::{BlockId, NodeId, ROOT, Tree},
};

pub(crate) async fn resolve(tree: &mut Tree, config: &Config) -> Result<(), OptionError> {
    prepare(tree, ROOT).await?;

    if config.only_slow {
        tracing::debug!("removing everything that is not slow");
        remove_non_slow(tree, ROOT);
    }
    if config.skip_slow {
        tracing::debug!("skipping slow tests");
        skip_slow(tree, ROOT);
    }

    mark_skipped(tree, ROOT);
    if check_inclusive(tree, ROOT) {
        tracing::debug!("only-marked nodes found, dropping the rest");
        delete_non_inclusive(tree, ROOT);
    }
    delete_children_with_no_tests(tree, ROOT);
    Ok(())
}

fn prepare(tree: &mut Tree, block: BlockId) -> BoxFuture<'_, Result<(), OptionError>> {
    async move {
        for child in tree.block(block).children.clone() {
            prepare_node(tree, child).await?;
            if let NodeId::Block(id) = child {
                prepare(tree, id).await?;
            }
        }
        Ok(())
    }
    .boxed()
}

async fn prepare_node(tree: &mut Tree, node: NodeId) -> Result<(), OptionError> {
    let options = match node {
        NodeId::Block(id) => tree.block_mut(id).options.take(),
        NodeId::Test(id) => tree.test_mut(id).options.take(),
    };
    let Some(options) = options else {
        return Ok(());
    };

    if let Some(skip) = &options.skip {
        if !tree.is_exclusive(node) && options::prepare_skip(skip).await? {
            tree.skip(node);
        }
    }
    if let Some(timeout) = &options.timeout {
        let ms = options::prepare_timeout(timeout).await?;
        tree.set_timeout(node, ms);
    }

    if let NodeId::Test(id) = node {
        let block = tree.test(id).block;
        let local = options
            .before
            .into_iter()
            .map(|hook| (HookKind::BeforeTest, hook))
            .chain(options.after.into_iter().map(|hook| (HookKind::AfterTest, hook)));
        for (kind, (description, callback)) in local {
            tree.add_local_hook(id, Hook::new(kind, description, callback, block));
        }
    }
    Ok(())
}

/// Keep only slow tests and the blocks leading to them, returns whether any is left.
fn remove_non_slow(tree: &mut Tree, block: BlockId) -> bool {
    let mut kept = Vec::new();
    for child in tree.block(block).children.clone() {
        let keep = match child {
            NodeId::Block(id) => remove_non_slow(tree, id),
            NodeId::Test(id) => tree.test(id).slow,
        };
        if keep {
            kept.push(child);
        }
    }
    let has_slow = !kept.is_empty();
    tree.block_mut(block).children = kept;
    has_slow
}

fn skip_slow(tree: &mut Tree, block: BlockId) {
    for child in tree.block(block).children.clone() {
        match child {
            NodeId::Block(id) => skip_slow(tree, id),
            NodeId::Test(id) if tree.test(id).slow => tree.skip(child),
            NodeId::Test(_) => {}
        }
    }
}

/// Push skip and todo of exclusive blocks down to every descendant.
fn mark_skipped(tree: &mut Tree, block: BlockId) {
    let exclusive = tree.is_block_exclusive(block);
    let todo = tree.block(block).flags.todo;
    for child in tree.block(block).children.clone() {
        if exclusive {
            match todo {
                true => tree.todo(child),
                false => tree.skip(child),
            }
        }
        if let NodeId::Block(id) = child {
            mark_skipped(tree, id);
        }
    }
}

/// Mark the paths to every only-marked node, returns whether any was found.
///
/// An only-marked block without only-marked descendants includes everything
/// below it. Exclusive nodes are never considered.
fn check_inclusive(tree: &mut Tree, block: BlockId) -> bool {
    if tree.is_inclusive(block.into()) && !tree.has_inclusive(block) {
        mark_inclusive(tree, block);
        return true;
    }

    let mut found = false;
    for child in tree.block(block).children.clone() {
        if tree.is_exclusive(child) {
            continue;
        }
        if tree.is_inclusive(child) {
            found = true;
            tree.only(block.into());
            if let NodeId::Block(id) = child {
                check_inclusive(tree, id);
            }
        } else if let NodeId::Block(id) = child {
            if check_inclusive(tree, id) {
                found = true;
                tree.only(block.into());
            }
        }
    }
    found
}

fn mark_inclusive(tree: &mut Tree, block: BlockId) {
    for child in tree.block(block).children.clone() {
        tree.only(child);
        if let NodeId::Block(id) = child {
            mark_inclusive(tree, id);
        }
    }
}

fn delete_non_inclusive(tree: &mut Tree, block: BlockId) {
    let children: Vec<_> = tree
        .block(block)
        .children
        .iter()
        .copied()
        .filter(|child| tree.is_inclusive(*child))
        .collect();
    tree.block_mut(block).children = children.clone();
    for child in children {
        if let NodeId::Block(id) = child {
            delete_non_inclusive(tree, id);
        }
    }
}

fn delete_children_with_no_tests(tree: &mut Tree, block: BlockId) {
    let mut kept = Vec::new();
    for child in tree.block(block).children.clone() {
        if let NodeId::Block(id) = child {
            delete_children_with_no_tests(tree, id);
            if tree.block(id).children.is_empty() {
                continue;
            }
        }
        kept.push(child);
    }
    tree.block_mut(block).children = kept;
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        callback::Callback,
        options::{NodeOptions, OptionValue},
        tree::TestId,
    };

    fn test(tree: &mut Tree, block: BlockId, name: &str) -> TestId {
        tree.add_test(block, name, Callback::default())
    }

    /// Descriptions of all tests still in the tree, with whether they are skipped.
    fn remaining(tree: &Tree) -> Vec<(String, bool)> {
        fn walk(tree: &Tree, block: BlockId, out: &mut Vec<(String, bool)>) {
            for child in tree.block(block).children() {
                match *child {
                    NodeId::Block(id) => walk(tree, id, out),
                    NodeId::Test(id) => out.push((
                        tree.test(id).description().to_string(),
                        tree.is_test_exclusive(id),
                    )),
                }
            }
        }
        let mut out = Vec::new();
        walk(tree, ROOT, &mut out);
        out
    }

    fn run(tree: &mut Tree, config: &Config) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        rt.block_on(resolve(tree, config)).unwrap();
    }

    #[test]
    fn only_marks_are_unioned_across_depths() {
        let mut tree = Tree::new();
        let a = tree.add_block(ROOT, "A");
        let x = test(&mut tree, a, "x");
        tree.only(x.into());
        let b = tree.add_block(ROOT, "B");
        test(&mut tree, b, "y");
        let c = tree.add_block(b, "C");
        let z = test(&mut tree, c, "z");
        tree.only(z.into());

        run(&mut tree, &Config::default());

        assert_eq!(
            remaining(&tree),
            [("x".to_string(), false), ("z".to_string(), false)]
        );
    }

    #[test]
    fn only_next_to_deeper_only_keeps_both() {
        let mut tree = Tree::new();
        let a = test(&mut tree, ROOT, "a");
        tree.only(a.into());
        let b = tree.add_block(ROOT, "B");
        let inner = test(&mut tree, b, "b");
        tree.only(inner.into());
        test(&mut tree, b, "c");

        run(&mut tree, &Config::default());

        let names: Vec<_> = remaining(&tree).into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["a", "b"]);
    }

    #[test]
    fn only_block_without_nested_only_keeps_everything_inside() {
        let mut tree = Tree::new();
        let a = tree.add_block(ROOT, "A");
        tree.only(a.into());
        test(&mut tree, a, "one");
        let nested = tree.add_block(a, "nested");
        test(&mut tree, nested, "two");
        test(&mut tree, ROOT, "outside");

        run(&mut tree, &Config::default());

        let names: Vec<_> = remaining(&tree).into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["one", "two"]);
    }

    #[test]
    fn only_under_skip_is_ignored() {
        let mut tree = Tree::new();
        test(&mut tree, ROOT, "runs");
        let skipped = tree.add_block(ROOT, "skipped");
        tree.skip(skipped.into());
        let only = test(&mut tree, skipped, "only");
        tree.only(only.into());

        run(&mut tree, &Config::default());

        assert_eq!(
            remaining(&tree),
            [("runs".to_string(), false), ("only".to_string(), true)]
        );
    }

    #[test]
    fn todo_blocks_mark_children_todo() {
        let mut tree = Tree::new();
        let block = tree.add_block(ROOT, "later");
        tree.todo(block.into());
        let t = test(&mut tree, block, "t");

        run(&mut tree, &Config::default());

        assert!(tree.test(t).flags().todo);
        assert!(tree.test(t).flags().skip);
    }

    #[test]
    fn todo_tests_stay_todo_inside_skipped_blocks() {
        let mut tree = Tree::new();
        let block = tree.add_block(ROOT, "skipped");
        tree.skip(block.into());
        let later = test(&mut tree, block, "later");
        tree.todo(later.into());
        let plain = test(&mut tree, block, "plain");

        run(&mut tree, &Config::default());

        assert!(tree.test(later).flags().todo);
        assert!(!tree.test(plain).flags().todo);
        assert!(tree.is_test_exclusive(plain));
    }

    #[test]
    fn empty_blocks_are_pruned() {
        let mut tree = Tree::new();
        let empty = tree.add_block(ROOT, "empty");
        tree.add_block(empty, "emptier");
        let full = tree.add_block(ROOT, "full");
        test(&mut tree, full, "t");

        run(&mut tree, &Config::default());

        assert_eq!(tree.block(ROOT).children(), [NodeId::Block(full)]);
    }

    #[test]
    fn slow_filters() {
        let build = || {
            let mut tree = Tree::new();
            let block = tree.add_block(ROOT, "block");
            let slow = test(&mut tree, block, "slow");
            tree.test_mut(slow).slow = true;
            test(&mut tree, block, "fast");
            test(&mut tree, ROOT, "top");
            tree
        };

        let mut only_slow = build();
        run(&mut only_slow, &Config::default().with_only_slow(true));
        assert_eq!(remaining(&only_slow), [("slow".to_string(), false)]);

        let mut skip_slow = build();
        run(&mut skip_slow, &Config::default().with_skip_slow(true));
        assert_eq!(
            remaining(&skip_slow),
            [
                ("slow".to_string(), true),
                ("fast".to_string(), false),
                ("top".to_string(), false)
            ]
        );
    }

    #[test]
    fn options_are_prepared() {
        let mut tree = Tree::new();
        let block = tree.add_block(ROOT, "block");
        tree.block_mut(block).options = Some(NodeOptions::new().with_timeout(300_u64));
        let t = test(&mut tree, block, "t");
        tree.test_mut(t).options = Some(
            NodeOptions::new()
                .with_skip(OptionValue::from_fn(|| async { true }))
                .with_before_named("local", |_: crate::HookContext| ()),
        );

        run(&mut tree, &Config::default());

        assert_eq!(tree.block(block).own_timeout(), Some(300));
        assert!(tree.test(t).flags().skip);
        assert_eq!(tree.test(t).local_hooks(HookKind::BeforeTest)[0].description(), "local");
    }

    #[test]
    fn skip_option_is_not_evaluated_for_exclusive_nodes() {
        let mut tree = Tree::new();
        let block = tree.add_block(ROOT, "block");
        tree.skip(block.into());
        tree.block_mut(block).options = Some(NodeOptions::new().with_skip("not a bool"));
        test(&mut tree, block, "t");

        run(&mut tree, &Config::default());
    }

    #[test]
    fn invalid_options_fail_resolution() {
        let mut tree = Tree::new();
        let t = test(&mut tree, ROOT, "t");
        tree.test_mut(t).options = Some(NodeOptions::new().with_timeout(-5_i64));

        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let err = rt.block_on(resolve(&mut tree, &Config::default())).unwrap_err();
        assert_eq!(err.to_string(), "timeout: cannot be negative");
    }
}

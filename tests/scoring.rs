use quartet_support::cluster::{Quadripartition, Tripartition};
use quartet_support::config::{AnnotationMode, InferenceOptions};
use quartet_support::encoding::GeneTrees;
use quartet_support::error::Result;
use quartet_support::scorer::{QuartetInference, Score};
use quartet_support::taxa::IndividualMapping;
use quartet_support::tree::Tree;
use quartet_support::weights::{GeneTreeWeights, QuadResults, WeightCalculator};

fn parse(newicks: &[&str]) -> Vec<Tree> {
    newicks.iter().map(|n| Tree::from_newick(n).unwrap()).collect()
}

fn inference(newicks: &[&str]) -> QuartetInference {
    QuartetInference::new(parse(newicks), None, InferenceOptions::default()).unwrap()
}

fn choose4(n: u64) -> u64 {
    n * (n - 1) * (n - 2) * (n - 3) / 24
}

/// Delegates to [`GeneTreeWeights`] but hides its precomputed total, forcing
/// the replay path of the max-score computation.
struct WithoutShortcut(GeneTreeWeights);

impl WeightCalculator for WithoutShortcut {
    fn tripartition_weight(&self, tripartition: &Tripartition) -> u64 {
        self.0.tripartition_weight(tripartition)
    }

    fn quadripartition_weights(&self, quads: &[Quadripartition; 3]) -> QuadResults {
        self.0.quadripartition_weights(quads)
    }
}

fn without_shortcut(genes: &GeneTrees) -> Result<Box<dyn WeightCalculator>> {
    Ok(Box::new(WithoutShortcut(GeneTreeWeights::new(genes)?)))
}

#[test]
fn max_possible_of_one_quartet() {
    assert_eq!(inference(&["((A,B),(C,D));"]).max_possible().unwrap(), 1);
}

#[test]
fn max_possible_of_binary_trees_is_every_quartet() {
    let cases: [(&str, u64); 6] = [
        ("((A,B),(C,(D,E)));", 5),
        ("((((A,B),C),D),E);", 5),
        ("(((A,B),(C,D)),(E,F));", 6),
        ("(((((A,B),C),D),E),F);", 6),
        ("(((A,B),(C,D)),((E,F),G));", 7),
        ("((((((A,B),C),D),E),F),G);", 7),
    ];
    for (newick, n) in cases {
        let mut fast = inference(&[newick]);
        assert_eq!(fast.max_possible().unwrap(), choose4(n), "{newick}");

        let mut general = inference(&[newick])
            .with_weight_calculator(without_shortcut)
            .unwrap();
        assert_eq!(general.max_possible().unwrap(), choose4(n), "{newick}");
    }
}

#[test]
fn max_possible_of_a_star_is_zero() {
    assert_eq!(inference(&["(A,B,C,D,E);"]).max_possible().unwrap(), 0);
}

#[test]
fn fast_and_general_paths_agree_on_mixed_gene_trees() {
    let genes = [
        "((A,B),(C,(D,E)));",
        "((A,C,B),(D,E,F));",
        "(((A,F),B),(C,D));",
        "(A,(B,(C,(D,(E,F)))));",
    ];
    let fast = inference(&genes).max_possible().unwrap();
    let general = inference(&genes)
        .with_weight_calculator(without_shortcut)
        .unwrap()
        .max_possible()
        .unwrap();
    assert_eq!(fast, general);
}

#[test]
fn gene_tree_scores_itself_exactly_one() {
    let gene = "(((A,B),(C,D)),((E,F),G));";
    let mut inference = inference(&[gene, gene, gene]);
    let mut species = Tree::from_newick(gene).unwrap();
    let report = inference.score_tree(&mut species, true).unwrap();
    assert_eq!(report.max_possible, 3 * 35);
    assert_eq!(report.score, Score::Computed { raw: 105, normalized: 1.0 });
}

#[test]
fn normalized_score_stays_in_unit_interval() {
    let genes = [
        "((A,B),(C,(D,E)));",
        "((A,C),(B,(D,E)));",
        "((A,E),(C,(D,B)));",
        "(((A,B),C),(D,E));",
    ];
    for species in ["((A,B),(C,(D,E)));", "((A,D),(C,(B,E)));", "(A,(B,(C,(D,E))));"] {
        let mut inference = inference(&genes);
        let mut tree = Tree::from_newick(species).unwrap();
        let report = inference.score_tree(&mut tree, false).unwrap();
        let normalized = report.score.normalized().unwrap();
        assert!((0.0..=1.0).contains(&normalized), "{species}: {normalized}");
    }
}

#[test]
fn repeated_scoring_is_idempotent() {
    let genes = ["((A,B),(C,D));", "((A,C),(B,D));", "((A,B),(C,D));"];
    let mut inference = inference(&genes);

    let mut first = Tree::from_newick("((A,B),(C,D));").unwrap();
    let r1 = inference.score_tree(&mut first, true).unwrap();
    let mut second = Tree::from_newick("((A,B),(C,D));").unwrap();
    let r2 = inference.score_tree(&mut second, false).unwrap();
    let r3 = inference.score_tree(&mut second, false).unwrap();

    assert_eq!(r1, r2);
    assert_eq!(r2, r3);
    assert_eq!(first.to_newick(), second.to_newick());
    assert_eq!(r1.score, Score::Computed { raw: 2, normalized: 2.0 / 3.0 });
}

#[test]
fn species_leaves_expand_into_individuals() {
    let mapping = IndividualMapping::parse("X:x1,x2\nY:y1\nZ:z1\nW:w1\n").unwrap();
    let genes = parse(&["(((x1,x2),y1),(z1,w1));", "(((x2,x1),y1),(w1,z1));"]);
    let options = InferenceOptions::default().with_annotation(AnnotationMode::QuartetFrequencies);
    let mut inference = QuartetInference::new(genes, Some(mapping), options).unwrap();

    let mut species = Tree::from_newick("((X,Y),(Z,W));").unwrap();
    let report = inference.score_tree(&mut species, true).unwrap();
    assert_eq!(report.max_possible, 10);
    assert_eq!(report.score, Score::Computed { raw: 10, normalized: 1.0 });
    assert_eq!(species.leaf_names(), vec!["x1", "x2", "y1", "z1", "w1"]);
}

#[test]
fn three_individuals_reduce_the_maximum() {
    let mapping = IndividualMapping::parse("X:x1,x2,x3\nY:y\nZ:z\n").unwrap();
    let genes = parse(&["(((x1,x2),x3),(y,z));"]);
    let mut inference =
        QuartetInference::new(genes, Some(mapping), InferenceOptions::default()).unwrap();
    // C(5,4) quartets, two of which hold three individuals of X
    assert_eq!(inference.max_possible().unwrap(), 3);
}

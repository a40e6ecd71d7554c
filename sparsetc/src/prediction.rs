//! Prediction files and the id2outcome report.

use std::io::Write;
use std::path::Path;

use crate::errors::{Result, SparseTcError};
use crate::indexer::OutcomeIndex;
use crate::utils::{self, write_atomically};

pub const PREDICTION_FILE: &str = "predictions.txt";
pub const ID2OUTCOME_FILE: &str = "id2outcome.txt";

const PREDICTION_HEADER: &str = "#prediction;gold";
const ID2OUTCOME_HEADER: &str = "#ID=PREDICTION;GOLDSTANDARD;THRESHOLD";

/// A predicted value and the gold value of one instance.
///
/// Both are class codes in classification and numbers in regression.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Prediction {
    pub predicted: String,
    pub gold: String,
}

impl Prediction {
    pub fn new<P, G>(predicted: P, gold: G) -> Self
    where
        P: Into<String>,
        G: Into<String>,
    {
        Self {
            predicted: predicted.into(),
            gold: gold.into(),
        }
    }
}

pub fn write_predictions<P>(path: P, predictions: &[Prediction]) -> Result<()>
where
    P: AsRef<Path>,
{
    write_atomically(path, |f| {
        writeln!(f, "{PREDICTION_HEADER}")?;
        for p in predictions {
            writeln!(f, "{};{}", p.predicted, p.gold)?;
        }
        Ok(())
    })
}

/// Reads a prediction file. Lines starting with `#` are comments.
///
/// # Errors
///
/// [`SparseTcError::InvalidFormat`] is returned with the line number of the first row that is
/// not `predicted;gold`.
pub fn read_predictions<P>(path: P) -> Result<Vec<Prediction>>
where
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let mut predictions = vec![];
    for (i, line) in utils::read_lines(path)?.iter().enumerate() {
        if line.starts_with('#') || line.trim().is_empty() {
            continue;
        }
        let (predicted, gold) = line
            .split_once(';')
            .filter(|(p, g)| !p.is_empty() && !g.is_empty() && !g.contains(';'))
            .ok_or_else(|| {
                SparseTcError::invalid_format(
                    path,
                    Some(i + 1),
                    format!("expected `predicted;gold` but got [{line}]"),
                )
            })?;
        predictions.push(Prediction::new(predicted.trim(), gold.trim()));
    }
    Ok(predictions)
}

/// Reads the index to instance id table of a dataset directory.
pub fn read_instance_ids<P>(path: P) -> Result<Vec<String>>
where
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let mut ids = vec![];
    for (i, line) in utils::read_lines(path)?.iter().enumerate() {
        if line.starts_with('#') || line.is_empty() {
            continue;
        }
        let (idx, id) = line.split_once('\t').ok_or_else(|| {
            SparseTcError::invalid_format(path, Some(i + 1), "expected `index<TAB>id`")
        })?;
        if idx.parse::<usize>().ok() != Some(ids.len()) {
            return Err(SparseTcError::invalid_format(
                path,
                Some(i + 1),
                format!("expected index [{}] but got [{idx}]", ids.len()),
            ));
        }
        ids.push(id.to_string());
    }
    Ok(ids)
}

/// Writes the id2outcome report.
///
/// `outcomes` is `None` in regression mode.
///
/// # Errors
///
/// [`SparseTcError::Alignment`] is returned if `ids` and `predictions` differ in length.
pub fn write_id2outcome<P>(
    path: P,
    predictions: &[Prediction],
    ids: &[String],
    outcomes: Option<&OutcomeIndex>,
) -> Result<()>
where
    P: AsRef<Path>,
{
    if ids.len() != predictions.len() {
        return Err(SparseTcError::count_mismatch(
            "instance ids",
            predictions.len(),
            ids.len(),
        ));
    }
    write_atomically(path, |f| {
        writeln!(f, "{ID2OUTCOME_HEADER}")?;
        write!(f, "#labels")?;
        for (label, id) in outcomes.into_iter().flat_map(OutcomeIndex::iter) {
            write!(f, " {id}={label}")?;
        }
        writeln!(f)?;
        for (id, p) in ids.iter().zip(predictions) {
            writeln!(f, "{id}={};{};-1", p.predicted, p.gold)?;
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;

    use crate::instance::LearningMode;
    use crate::test_utils::TempDir;

    #[test]
    fn test_write_read_predictions() {
        let dir = TempDir::new("predictions");
        let path = dir.path().join(PREDICTION_FILE);
        let predictions = vec![Prediction::new("0", "0"), Prediction::new("0", "1")];
        write_predictions(&path, &predictions).unwrap();

        assert_eq!("#prediction;gold\n0;0\n0;1\n", fs::read_to_string(&path).unwrap());
        assert_eq!(predictions, read_predictions(&path).unwrap());
    }

    #[test]
    fn test_read_predictions_malformed() {
        let dir = TempDir::new("predictions_malformed");
        let path = dir.path().join(PREDICTION_FILE);
        fs::write(&path, "#prediction;gold\n0;0\n1\n").unwrap();
        let err = read_predictions(&path).unwrap_err();

        assert!(err.to_string().contains("predictions.txt:3:"));
    }

    #[test]
    fn test_read_instance_ids() {
        let dir = TempDir::new("instance_ids");
        let path = dir.path().join("index2Instanceid.txt");
        fs::write(&path, "#Index\tDkProInstanceId\n0\tdoc1\n1\tdoc2\n").unwrap();

        assert_eq!(
            vec!["doc1".to_string(), "doc2".to_string()],
            read_instance_ids(&path).unwrap()
        );

        fs::write(&path, "#Index\tDkProInstanceId\n1\tdoc2\n").unwrap();

        assert!(read_instance_ids(&path).is_err());
    }

    #[test]
    fn test_write_id2outcome() {
        let dir = TempDir::new("id2outcome");
        let path = dir.path().join(ID2OUTCOME_FILE);
        let outcomes = OutcomeIndex::build(["A", "B"], LearningMode::SingleLabel, 0).unwrap();
        let predictions = vec![Prediction::new("0", "0"), Prediction::new("0", "1")];
        let ids = vec!["d1".to_string(), "d2".to_string()];
        write_id2outcome(&path, &predictions, &ids, Some(&outcomes)).unwrap();

        assert_eq!(
            "#ID=PREDICTION;GOLDSTANDARD;THRESHOLD\n#labels 0=A 1=B\nd1=0;0;-1\nd2=0;1;-1\n",
            fs::read_to_string(&path).unwrap()
        );
    }

    #[test]
    fn test_write_id2outcome_count_mismatch() {
        let dir = TempDir::new("id2outcome_mismatch");
        let path = dir.path().join(ID2OUTCOME_FILE);
        let predictions = vec![Prediction::new("1.5", "2")];

        assert!(write_id2outcome(&path, &predictions, &[], None).is_err());
        assert!(!path.exists());
    }
}

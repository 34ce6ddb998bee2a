use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::rc::Rc;

use anyhow::{bail, Result};
use itertools::Itertools;
use log::info;

use crate::btree::BTree;
use crate::buffer::BufferManager;
use crate::catalog::{DatabaseCatalog, IndexInfo, TableInfo};
use crate::constants::{
    FRAME_SIZE, MOVIE_DB_FILE, MOVIE_TSV, PEOPLE_DB_FILE, PEOPLE_TSV, QUERY_OUT_FILE,
    TEST_MOVIE_DB_FILE, TEST_MOVIE_TSV, TEST_PEOPLE_DB_FILE, TEST_PEOPLE_TSV,
    TEST_TITLE_INDEX_FILE, TEST_WORKED_ON_DB_FILE, TEST_WORKED_ON_TSV, TITLE_INDEX_FILE,
    WORKED_ON_DB_FILE, WORKED_ON_TSV,
};
use crate::fixed_str::{FixedMovieId, FixedPersonId, FixedTitle};
use crate::join::BnlJoinOp;
use crate::loader::{
    load_heap_file, movie_row_from_tsv, person_row_from_tsv, worked_on_row_from_tsv,
};
use crate::materialize::MaterializeOp;
use crate::operator::{Operator, ProjectOp, SelectOp};
use crate::row::{MovieRow, MovieWorkedOnRow, PersonRow, Tuple, WorkedOnKeyRow, WorkedOnRow};
use crate::scan::ScanOp;

/// Source TSVs and generated files for one dataset (real or test).
#[derive(Debug, Clone)]
pub struct DataPaths {
    pub movie_tsv: String,
    pub worked_on_tsv: String,
    pub people_tsv: String,
    pub movie_db: String,
    pub worked_on_db: String,
    pub people_db: String,
    pub title_index: String,
}

impl DataPaths {
    pub fn standard(test: bool) -> Self {
        if test {
            DataPaths {
                movie_tsv: TEST_MOVIE_TSV.to_string(),
                worked_on_tsv: TEST_WORKED_ON_TSV.to_string(),
                people_tsv: TEST_PEOPLE_TSV.to_string(),
                movie_db: TEST_MOVIE_DB_FILE.to_string(),
                worked_on_db: TEST_WORKED_ON_DB_FILE.to_string(),
                people_db: TEST_PEOPLE_DB_FILE.to_string(),
                title_index: TEST_TITLE_INDEX_FILE.to_string(),
            }
        } else {
            DataPaths {
                movie_tsv: MOVIE_TSV.to_string(),
                worked_on_tsv: WORKED_ON_TSV.to_string(),
                people_tsv: PEOPLE_TSV.to_string(),
                movie_db: MOVIE_DB_FILE.to_string(),
                worked_on_db: WORKED_ON_DB_FILE.to_string(),
                people_db: PEOPLE_DB_FILE.to_string(),
                title_index: TITLE_INDEX_FILE.to_string(),
            }
        }
    }
}

/// Figures `run_query` reports besides the result file itself.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryStats {
    pub movie_selectivity: f64,
    pub director_selectivity: f64,
    pub join1_tuples: u64,
    pub result_rows: u64,
    pub io_count: u64,
}

fn build_catalog(paths: &DataPaths) -> DatabaseCatalog {
    let mut catalog = DatabaseCatalog::new();
    catalog.add_table(TableInfo {
        table_name: "Movie".to_string(),
        file_path: paths.movie_db.clone(),
    });
    catalog.add_table(TableInfo {
        table_name: "WorkedOn".to_string(),
        file_path: paths.worked_on_db.clone(),
    });
    catalog.add_table(TableInfo {
        table_name: "Person".to_string(),
        file_path: paths.people_db.clone(),
    });
    catalog.add_index(IndexInfo {
        index_name: paths.title_index.clone(),
        table_name: "Movie".to_string(),
        file_path: paths.title_index.clone(),
        key_name: "title".to_string(),
    });
    catalog
}

/// Load the source TSVs into heap files and build the title index.
/// Idempotent: anything that already exists on disk is left alone.
pub fn pre_process(test: bool) -> Result<()> {
    pre_process_at(&DataPaths::standard(test))
}

pub fn pre_process_at(paths: &DataPaths) -> Result<()> {
    let bm = Rc::new(RefCell::new(BufferManager::new(FRAME_SIZE)));

    if Path::new(&paths.movie_db).exists() {
        info!("{} already exists, skipping movie load", paths.movie_db);
    } else {
        load_heap_file::<MovieRow, _>(
            &mut bm.borrow_mut(),
            &paths.movie_tsv,
            &paths.movie_db,
            movie_row_from_tsv,
        )?;
    }

    if Path::new(&paths.worked_on_db).exists() {
        info!("{} already exists, skipping workedon load", paths.worked_on_db);
    } else {
        load_heap_file::<WorkedOnRow, _>(
            &mut bm.borrow_mut(),
            &paths.worked_on_tsv,
            &paths.worked_on_db,
            worked_on_row_from_tsv,
        )?;
    }

    if Path::new(&paths.people_db).exists() {
        info!("{} already exists, skipping people load", paths.people_db);
    } else {
        load_heap_file::<PersonRow, _>(
            &mut bm.borrow_mut(),
            &paths.people_tsv,
            &paths.people_db,
            person_row_from_tsv,
        )?;
    }

    bm.borrow_mut().force()?;

    if Path::new(&paths.title_index).exists() {
        info!("{} already exists, skipping index build", paths.title_index);
    } else {
        build_title_index(bm.clone(), &paths.movie_db, &paths.title_index)?;
    }

    bm.borrow_mut().force()?;
    Ok(())
}

/// Scan the Movie heap file and insert (title, rid) into a fresh B+ tree.
fn build_title_index(
    bm: Rc<RefCell<BufferManager>>,
    movie_db: &str,
    index_file: &str,
) -> Result<u64> {
    bm.borrow_mut().register_file(movie_db)?;
    let page_count = bm.borrow_mut().page_count(movie_db).unwrap_or(0);

    let mut tree: BTree<FixedTitle> = BTree::open(index_file, bm.clone())?;
    let mut inserted: u64 = 0;
    for pid in 0..page_count {
        let page = bm.borrow_mut().get_page::<MovieRow>(pid, movie_db)?;
        for slot in 0..page.num_records() {
            if let Some(row) = page.get_row(slot) {
                tree.insert(row.title, (pid, slot))?;
                inserted += 1;
            }
        }
        bm.borrow_mut().unpin_page(pid, movie_db);
    }
    info!("title index {} built with {} entries", index_file, inserted);
    Ok(inserted)
}

/// Execute the canonical director query and report its statistics.
pub fn run_query(start: &str, end: &str, buffer_size: usize, test: bool) -> Result<QueryStats> {
    let paths = DataPaths::standard(test);
    let stats = run_query_at(&paths, start, end, buffer_size, QUERY_OUT_FILE)?;

    println!("Movie selectivity: {:.6}", stats.movie_selectivity);
    println!("Director selectivity: {:.6}", stats.director_selectivity);
    println!("Tuples out of join 1: {}", stats.join1_tuples);
    println!(
        "Result rows: {} (written to {})",
        stats.result_rows, QUERY_OUT_FILE
    );
    println!("Total I/O count: {}", stats.io_count);
    Ok(stats)
}

/*
 * Plan, bottom up:
 *
 *   Project [title, name]
 *     BNLJoin on personId          (left block: movie+workedon, right: Person scan)
 *       BNLJoin on movieId         (left block: title-filtered movies)
 *         Select title in [start, end] <- Scan Movie
 *         Materialize (movieId, personId)
 *           Project [movieId, personId]
 *             Select category == "director" <- Scan WorkedOn
 *       Scan Person
 *
 * With B frames, each join gets (B - 6) / 2 block pages; the reserved six
 * cover the movie scan, the materialized scan, the person scan and
 * assorted per-call page use. The WorkedOn filter-projection is
 * materialized once so the first join's outer loop re-scans disk instead
 * of re-running the pipeline.
 */
pub fn run_query_at(
    paths: &DataPaths,
    start: &str,
    end: &str,
    buffer_size: usize,
    out_file: &str,
) -> Result<QueryStats> {
    if buffer_size < 8 {
        bail!(
            "buffer size {} leaves no room for a join block (need at least 8 frames)",
            buffer_size
        );
    }
    let block_size = (buffer_size - 6) / 2;

    let catalog = build_catalog(paths);
    let movie_file = catalog.get_table("Movie")?.file_path.clone();
    let worked_on_file = catalog.get_table("WorkedOn")?.file_path.clone();
    let people_file = catalog.get_table("Person")?.file_path.clone();
    for f in [&movie_file, &worked_on_file, &people_file] {
        if !Path::new(f).exists() {
            bail!("heap file {} not found, run pre_process first", f);
        }
    }

    // scratch files live next to the output file
    let temp_dir = Path::new(out_file)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    let mat_temp = temp_dir.join("workedon_mat.tmp").to_string_lossy().into_owned();
    let join1_temp = temp_dir.join("join1_block.tmp").to_string_lossy().into_owned();
    let join2_temp = temp_dir.join("join2_block.tmp").to_string_lossy().into_owned();

    let bm = Rc::new(RefCell::new(BufferManager::new(buffer_size)));

    // left of join 1: movies with title in [start, end]
    let start_key = FixedTitle::new(start);
    let end_key = FixedTitle::new(end);
    let movie_scan = ScanOp::<MovieRow>::new(bm.clone(), &movie_file, 0);
    let movie_select = SelectOp::new(
        Box::new(movie_scan),
        Box::new(move |t: &Tuple| {
            let title = FixedTitle::new(&t.fields[1]);
            start_key <= title && title <= end_key
        }),
    );
    let movie_stats = movie_select.stats();

    // right of join 1: WorkedOn filtered to directors, projected and
    // materialized to (movieId, personId)
    let worked_on_scan = ScanOp::<WorkedOnRow>::new(bm.clone(), &worked_on_file, 0);
    let director_select = SelectOp::new(
        Box::new(worked_on_scan),
        Box::new(|t: &Tuple| t.fields[2] == "director"),
    );
    let director_stats = director_select.stats();
    let worked_on_project = ProjectOp::new(Box::new(director_select), vec![0, 1]);
    let worked_on_mat = MaterializeOp::<WorkedOnKeyRow>::new(
        Box::new(worked_on_project),
        bm.clone(),
        &mat_temp,
        HashMap::from([("movieId".to_string(), 0), ("personId".to_string(), 1)]),
    );

    // join 1: movieId, output (movieId, title, movieId, personId)
    let join1 = BnlJoinOp::<FixedMovieId, MovieRow>::new(
        bm.clone(),
        Box::new(movie_select),
        Box::new(worked_on_mat),
        block_size,
        &join1_temp,
        Box::new(|t: &Tuple| FixedMovieId::new(&t.fields[0])),
        Box::new(|t: &Tuple| FixedMovieId::new(&t.fields[0])),
        HashMap::from([("movieId".to_string(), 0), ("title".to_string(), 1)]),
    )?;
    let join1_count = join1.total_out_handle();

    // join 2: personId against the Person table,
    // output (movieId, title, personId, personId, name)
    let people_scan = ScanOp::<PersonRow>::new(bm.clone(), &people_file, 0);
    let join2 = BnlJoinOp::<FixedPersonId, MovieWorkedOnRow>::new(
        bm.clone(),
        Box::new(join1),
        Box::new(people_scan),
        block_size,
        &join2_temp,
        Box::new(|t: &Tuple| FixedPersonId::new(&t.fields[3])),
        Box::new(|t: &Tuple| FixedPersonId::new(&t.fields[0])),
        HashMap::from([
            ("movieId".to_string(), 0),
            ("title".to_string(), 1),
            ("personId".to_string(), 3),
        ]),
    )?;

    let mut plan = ProjectOp::new(Box::new(join2), vec![1, 4]);

    let out = File::create(out_file)?;
    let mut writer = BufWriter::new(out);
    writeln!(writer, "title\tname")?;

    plan.open()?;
    let mut tuple = Tuple::default();
    let mut result_rows: u64 = 0;
    while plan.next(&mut tuple)? {
        writeln!(writer, "{}", tuple.fields.iter().join("\t"))?;
        result_rows += 1;
    }
    plan.close()?;
    writer.flush()?;

    let io_count = bm.borrow().io_count();
    info!(
        "query [{}..{}] produced {} rows with {} page I/Os",
        start, end, result_rows, io_count
    );

    Ok(QueryStats {
        movie_selectivity: movie_stats.selectivity(),
        director_selectivity: director_stats.selectivity(),
        join1_tuples: join1_count.get(),
        result_rows,
        io_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write_fixtures(dir: &Path) -> DataPaths {
        let p = |name: &str| dir.join(name).to_string_lossy().into_owned();
        let paths = DataPaths {
            movie_tsv: p("title.basics.tsv"),
            worked_on_tsv: p("title.principals.tsv"),
            people_tsv: p("name.basics.tsv"),
            movie_db: p("movie.bin"),
            worked_on_db: p("workedon.bin"),
            people_db: p("people.bin"),
            title_index: p("title_index.bin"),
        };

        fs::write(
            &paths.movie_tsv,
            "tconst\ttitleType\tprimaryTitle\n\
             tt0000001\tshort\tAlpha\n\
             tt0000002\tshort\tApple\n\
             tt0000003\tshort\tBanana\n\
             tt0000004\tshort\tAvatar\n",
        )
        .unwrap();
        fs::write(
            &paths.worked_on_tsv,
            "tconst\tordering\tnconst\tcategory\n\
             tt0000001\t1\tnm0000001\tdirector\n\
             tt0000001\t2\tnm0000002\tactor\n\
             tt0000002\t1\tnm0000002\tdirector\n\
             tt0000003\t1\tnm0000001\tdirector\n\
             tt0000004\t1\tnm0000003\tdirector\n",
        )
        .unwrap();
        fs::write(
            &paths.people_tsv,
            "nconst\tprimaryName\n\
             nm0000001\tAlice Smith\n\
             nm0000002\tBob Jones\n\
             nm0000003\tCarol King\n",
        )
        .unwrap();
        paths
    }

    #[test]
    fn test_pre_process_is_idempotent() {
        let dir = tempdir().unwrap();
        let paths = write_fixtures(dir.path());

        pre_process_at(&paths).unwrap();
        let first = fs::read(&paths.movie_db).unwrap();
        assert!(Path::new(&paths.title_index).exists());

        // second run leaves the generated files untouched
        pre_process_at(&paths).unwrap();
        assert_eq!(fs::read(&paths.movie_db).unwrap(), first);
    }

    #[test]
    fn test_query_end_to_end() {
        let dir = tempdir().unwrap();
        let paths = write_fixtures(dir.path());
        pre_process_at(&paths).unwrap();

        let out = dir.path().join("join_out.tsv").to_string_lossy().into_owned();
        let stats = run_query_at(&paths, "A", "B", 20, &out).unwrap();

        // Alpha, Apple and Avatar fall in [A, B]; Banana does not
        assert!((stats.movie_selectivity - 0.75).abs() < 1e-9);
        // four of five WorkedOn rows are directors
        assert!((stats.director_selectivity - 0.8).abs() < 1e-9);
        assert_eq!(stats.join1_tuples, 3);
        assert_eq!(stats.result_rows, 3);
        assert!(stats.io_count > 0);

        let content = fs::read_to_string(&out).unwrap();
        let mut lines = content.lines();
        assert_eq!(lines.next(), Some("title\tname"));
        let mut rows: Vec<&str> = lines.collect();
        rows.sort_unstable();
        assert_eq!(
            rows,
            vec!["Alpha\tAlice Smith", "Apple\tBob Jones", "Avatar\tCarol King"]
        );
    }

    #[test]
    fn test_query_is_deterministic_across_runs() {
        let dir = tempdir().unwrap();
        let paths = write_fixtures(dir.path());
        pre_process_at(&paths).unwrap();

        let out1 = dir.path().join("out1.tsv").to_string_lossy().into_owned();
        let out2 = dir.path().join("out2.tsv").to_string_lossy().into_owned();
        let s1 = run_query_at(&paths, "A", "B", 20, &out1).unwrap();
        let s2 = run_query_at(&paths, "A", "B", 20, &out2).unwrap();

        assert_eq!(s1, s2);
        assert_eq!(fs::read(&out1).unwrap(), fs::read(&out2).unwrap());
    }

    #[test]
    fn test_query_without_pre_process_fails() {
        let dir = tempdir().unwrap();
        let paths = write_fixtures(dir.path());
        let out = dir.path().join("out.tsv").to_string_lossy().into_owned();
        assert!(run_query_at(&paths, "A", "B", 20, &out).is_err());
    }

    #[test]
    fn test_query_rejects_tiny_buffer() {
        let dir = tempdir().unwrap();
        let paths = write_fixtures(dir.path());
        pre_process_at(&paths).unwrap();
        let out = dir.path().join("out.tsv").to_string_lossy().into_owned();
        assert!(run_query_at(&paths, "A", "B", 7, &out).is_err());
    }

    #[test]
    fn test_scratch_files_are_cleaned_up() {
        let dir = tempdir().unwrap();
        let paths = write_fixtures(dir.path());
        pre_process_at(&paths).unwrap();

        let out = dir.path().join("join_out.tsv").to_string_lossy().into_owned();
        run_query_at(&paths, "A", "B", 20, &out).unwrap();

        assert!(!dir.path().join("workedon_mat.tmp").exists());
        assert!(!dir.path().join("join1_block.tmp").exists());
        assert!(!dir.path().join("join2_block.tmp").exists());
    }
}

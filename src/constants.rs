// Field widths and file names shared by every layer of the engine.
// All on-disk integers (record counts, page ids, tree pointers) are
// little-endian i32 so the binary files are portable.

pub const PAGE_SIZE: usize = 4096;
// First four bytes of every heap page hold the record count.
pub const PAGE_HEADER_SIZE: usize = 4;

pub const MOVIE_ID_SIZE: usize = 9;
pub const TITLE_SIZE: usize = 30;
pub const PERSON_ID_SIZE: usize = 10;
pub const CATEGORY_SIZE: usize = 20;
pub const NAME_SIZE: usize = 105;

// Default number of frames in the buffer pool.
pub const FRAME_SIZE: usize = 24;

pub const MOVIE_DB_FILE: &str = "movie.bin";
pub const WORKED_ON_DB_FILE: &str = "workedon.bin";
pub const PEOPLE_DB_FILE: &str = "people.bin";
pub const TITLE_INDEX_FILE: &str = "title_index.bin";

pub const TEST_MOVIE_DB_FILE: &str = "test_movie.bin";
pub const TEST_WORKED_ON_DB_FILE: &str = "test_workedon.bin";
pub const TEST_PEOPLE_DB_FILE: &str = "test_people.bin";
pub const TEST_TITLE_INDEX_FILE: &str = "test_title_index.bin";

// Source TSVs live in the parent of the working directory.
pub const MOVIE_TSV: &str = "../title.basics.tsv";
pub const WORKED_ON_TSV: &str = "../title.principals.tsv";
pub const PEOPLE_TSV: &str = "../name.basics.tsv";

pub const TEST_MOVIE_TSV: &str = "../title.basics.test.tsv";
pub const TEST_WORKED_ON_TSV: &str = "../title.principals.test.tsv";
pub const TEST_PEOPLE_TSV: &str = "../name.basics.test.tsv";

pub const QUERY_OUT_FILE: &str = "join_out.tsv";
